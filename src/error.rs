//! Error types for definition loading, offset resolution, profiling and the REPL.

use std::path::PathBuf;
use thiserror::Error;

/// What went wrong on a single definition line.
#[derive(Error, Debug)]
pub enum DefinitionErrorKind {
    #[error("unknown data type {0:?}")]
    UnknownDataType(String),

    #[error("malformed offset {0:?}")]
    MalformedOffset(String),

    #[error("indirect offset {0:?} is not supported")]
    UnsupportedIndirectOffset(String),

    #[error("malformed expected value {value:?}: {reason}")]
    MalformedExpected { value: String, reason: String },

    #[error("duplicate mime types for one test: {existing} and {new}")]
    DuplicateMime { existing: String, new: String },

    #[error("invalid mime type {0:?}")]
    InvalidMime(String),

    #[error("{0} directive with no test to attach it to")]
    OrphanDirective(&'static str),

    #[error("level {0} does not follow the level of the previous test")]
    InvalidLevel(usize),

    #[error("unexpected line {0:?}")]
    UnexpectedLine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A definition source failed to load. Always carries its location.
#[derive(Error, Debug)]
#[error("{} line {line}: {kind}", .path.display())]
pub struct DefinitionError {
    pub path: PathBuf,
    pub line: usize,
    #[source]
    pub kind: DefinitionErrorKind,
}

impl DefinitionError {
    pub fn new(path: impl Into<PathBuf>, line: usize, kind: DefinitionErrorKind) -> Self {
        DefinitionError { path: path.into(), line, kind }
    }
}

/// An offset could not be turned into an absolute position.
///
/// The matching engine treats this as a structural dead end, never as a failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffsetError {
    #[error("relative offset {0} needs a previous match")]
    NoPreviousMatch(String),

    #[error("relative offset {offset} resolves before the start of the data (from {base})")]
    BeforeStart { offset: String, base: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfilingError {
    #[error("the profiler has not been started yet")]
    NotStarted,

    #[error("a profiler cannot be stopped while it is paused")]
    StoppedWhilePaused,

    #[error("a completed profiler cannot be paused or unpaused")]
    Completed,

    #[error("the profiler is not currently paused")]
    NotPaused,
}

/// Recoverable REPL errors. Printed, then the loop continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Undefined command: {0:?}. Try \"help\".")]
    UnknownCommand(String),

    #[error("Ambiguous command {input:?}; could be any of: {}", .candidates.join(", "))]
    AmbiguousCommand { input: String, candidates: Vec<String> },

    #[error("Unknown variable {0}")]
    UnknownVariable(String),

    #[error("Invalid value {value:?}; must be one of {expected}")]
    InvalidValue { value: String, expected: String },

    #[error("Invalid breakpoint pattern {0:?}")]
    InvalidBreakpoint(String),

    #[error("Invalid breakpoint {0:?}")]
    InvalidBreakpointIndex(String),

    #[error("The first test has not yet been run. Use `step`, `next`, or `run` to start testing.")]
    NoTestYet,

    #[error("{0}")]
    BadArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_error_display_has_location() {
        let err = DefinitionError::new(
            "magic/archive",
            12,
            DefinitionErrorKind::UnknownDataType("bogus".to_string()),
        );
        assert_eq!(err.to_string(), "magic/archive line 12: unknown data type \"bogus\"");
    }

    #[test]
    fn ambiguous_command_lists_candidates() {
        let err = CommandError::AmbiguousCommand {
            input: "s".to_string(),
            candidates: vec!["set".to_string(), "show".to_string(), "step".to_string()],
        };
        assert!(err.to_string().contains("set, show, step"));
    }
}
