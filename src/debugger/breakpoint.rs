//! Conditions that stop the debugger before a test's result is returned.

use std::fmt;
use std::path::Path;

use super::wildcard::Wildcard;
use crate::magic::{MagicTree, Match, TestId, TestResult};

/// Everything a breakpoint can look at.
#[derive(Debug, Clone, Copy)]
pub struct TestContext<'a> {
    pub tree: &'a MagicTree,
    pub node: TestId,
    pub data: &'a [u8],
    pub absolute_offset: u64,
    pub parent_match: Option<&'a Match>,
    pub result: &'a TestResult,
}

#[derive(Debug, Clone)]
pub enum Breakpoint {
    /// A test able to produce a matching MIME type.
    Mime(Wildcard),
    /// A test able to produce the extension.
    Extension(String),
    /// The test defined on `line` of `file`. `file` is a path if it contains a
    /// separator and a file name otherwise.
    Source { file: String, line: usize },
    /// The inner breakpoint, only when the test failed.
    OnFailure(Box<Breakpoint>),
    /// The inner breakpoint, only when the test matched.
    OnSuccess(Box<Breakpoint>),
}

impl Breakpoint {
    /// Parses a breakpoint command: `!` and `=` prefixes wrap whatever follows,
    /// then `mime:`, `ext:` and `file:line` are tried in that order.
    pub fn parse(command: &str) -> Option<Breakpoint> {
        let command = command.trim();
        if let Some(rest) = command.strip_prefix('!') {
            return Breakpoint::parse(rest).map(|b| Breakpoint::OnFailure(Box::new(b)));
        }
        if let Some(rest) = command.strip_prefix('=') {
            return Breakpoint::parse(rest).map(|b| Breakpoint::OnSuccess(Box::new(b)));
        }
        if let Some(mime) = strip_prefix_ignore_case(command, "mime:") {
            return Some(Breakpoint::Mime(Wildcard::parse(mime)));
        }
        if let Some(ext) = strip_prefix_ignore_case(command, "ext:") {
            return Some(Breakpoint::Extension(ext.to_string()));
        }
        let (file, line) = command.rsplit_once(':')?;
        let line: usize = line.trim().parse().ok()?;
        if file.is_empty() || line == 0 {
            return None;
        }
        Some(Breakpoint::Source { file: file.to_string(), line })
    }

    pub fn should_break(&self, ctx: &TestContext<'_>) -> bool {
        match self {
            Breakpoint::Mime(wildcard) => wildcard.is_contained_in(ctx.tree.mimetypes_of(ctx.node)),
            Breakpoint::Extension(ext) => ctx.tree.extensions_of(ctx.node).contains(ext.as_str()),
            Breakpoint::Source { file, line } => match &ctx.tree[ctx.node].source {
                Some(source) if source.line == *line => {
                    if file.contains('/') || file.contains(std::path::MAIN_SEPARATOR) {
                        source.path == Path::new(file)
                    } else {
                        source.file_name() == *file
                    }
                }
                _ => false,
            },
            Breakpoint::OnFailure(inner) => !ctx.result.is_match() && inner.should_break(ctx),
            Breakpoint::OnSuccess(inner) => ctx.result.is_match() && inner.should_break(ctx),
        }
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breakpoint::Mime(wildcard) => write!(f, "Breakpoint: Matching for MIME {}", wildcard),
            Breakpoint::Extension(ext) => write!(f, "Breakpoint: Matching for extension {}", ext),
            Breakpoint::Source { file, line } => write!(f, "Breakpoint: {} line {}", file, line),
            Breakpoint::OnFailure(inner) => write!(f, "[FAILED] {}", inner),
            Breakpoint::OnSuccess(inner) => write!(f, "[MATCHED] {}", inner),
        }
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    match text.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => Some(&text[prefix.len()..]),
        _ => None,
    }
}

/// How to write each kind of breakpoint, for `breakpoint` with no arguments.
pub const USAGE: &[(&str, &str, &str)] = &[
    (
        "b MIME:MIMETYPE",
        "break when a test is capable of matching that mimetype; \
         MIMETYPE can include the * and ? wildcards",
        "b MIME:application/pdf\n    b MIME:*pdf",
    ),
    (
        "b EXT:EXTENSION",
        "break when a test is capable of matching that extension",
        "b EXT:pdf",
    ),
    (
        "b FILENAME:LINE_NO",
        "break when the line of the given definition file is reached",
        "b archive:525",
    ),
];
