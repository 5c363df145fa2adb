//! `magic_tree` matches libmagic-style test trees against byte streams, and
//! ships an interactive debugger for stepping through the match.
//!
//! # About
//! Definitions are loaded into a forest of tests. A test only runs when its
//! parent matched, and a whole subtree is skipped when nothing below it can
//! produce a MIME type, so most of the forest is never looked at for any one
//! buffer.
//!
//! Every test evaluation goes through a [`TestEvaluator`]. The plain
//! [`Direct`] evaluator just runs the test; a [`Debugger`] records it, times
//! it, and stops at a prompt when a breakpoint fires.
//!
//! # Feature flags
//! `cli`:        Enable building of `tmagic` binary
//!
//! # Example
//! ```rust
//! // A PNG signature followed by an IHDR chunk header
//! let input: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR";
//!
//! // Find the MIME type of the data
//! let result = magic_tree::from_u8(input);
//! assert_eq!(result, "image/png");
//!
//! // Check if the MIME and the data are a match
//! let result = magic_tree::match_u8("image/png", input);
//! assert_eq!(result, true);
//! ```

#[macro_use]
extern crate lazy_static;

use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

pub mod basetype;
pub mod debugger;
pub mod error;
pub mod magic;
pub mod parser;
pub mod profiling;

pub use debugger::{Breakpoint, DebugSession, Debugger, DebuggerConfig, StepMode};
pub use error::{CommandError, DefinitionError, DefinitionErrorKind, OffsetError, ProfilingError};
pub use magic::builtin::BUILTIN;
pub use magic::{Direct, MagicTree, Match, Offset, TestEvaluator, TestId, TestNode, TestResult};
pub use parser::{Observed, ParseObserver, ParserRegistry, StructureParser, Submatch};
pub use profiling::{Profiler, ProfilerStack, Unprofiled};

pub type MIME = String;

/// Reads at most `bytecount` bytes from the start of a file.
pub fn read_bytes(filepath: &Path, bytecount: u64) -> Result<Vec<u8>, std::io::Error> {
    let mut b = Vec::<u8>::new();
    let f = File::open(filepath)?;
    f.take(bytecount).read_to_end(&mut b)?;
    Ok(b)
}

/// Checks if the given bytestream matches the given MIME type.
///
/// Base types (`text/plain`, `application/octet-stream`) are checked by
/// content; any other MIME type matches when one of the bundled tests for it
/// matches.
///
/// # Examples
/// ```rust
/// let input: &[u8] = b"GIF89a\x01\x00\x01\x00";
///
/// assert!(magic_tree::match_u8("image/gif", input));
/// assert!(!magic_tree::match_u8("image/png", input));
/// ```
pub fn match_u8(mimetype: &str, bytes: &[u8]) -> bool {
    match_tree(&BUILTIN, mimetype, bytes)
}

/// [`match_u8`] against any tree.
pub fn match_tree(tree: &MagicTree, mimetype: &str, bytes: &[u8]) -> bool {
    if basetype::TYPES.contains(&mimetype) {
        return basetype::check::from_u8(bytes, mimetype);
    }
    let roots = tree.tests_by_mime(mimetype);
    tree.match_roots(&roots, bytes, Direct)
        .any(|m| tree[m.node].mime() == Some(mimetype))
}

/// Gets the type of a byte stream.
///
/// Returns the MIME type of the most specific match, or a base type when no
/// test matches.
///
/// # Examples
/// ```rust
/// let input: &[u8] = b"%PDF-1.7\n";
///
/// assert_eq!(magic_tree::from_u8(input), "application/pdf");
/// assert_eq!(magic_tree::from_u8(b"just words"), "text/plain");
/// ```
pub fn from_u8(bytes: &[u8]) -> MIME {
    BUILTIN.identify(bytes)
}

/// Check if the given filepath matches the given MIME type.
///
/// A file that cannot be read matches nothing.
pub fn match_filepath(mimetype: &str, filepath: &Path) -> bool {
    match std::fs::read(filepath) {
        Ok(bytes) => match_u8(mimetype, &bytes),
        Err(_) => false,
    }
}

/// Gets the type of a file from its contents.
///
/// Does not look at the file name or extension. Returns `None` if the file
/// could not be read.
pub fn from_filepath(filepath: &Path) -> Option<MIME> {
    let bytes = std::fs::read(filepath).ok()?;
    Some(from_u8(&bytes))
}
