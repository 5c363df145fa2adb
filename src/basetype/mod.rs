//! Handles "base types": what data is when no magic test claims it.
pub const TEXT_PLAIN: &str = "text/plain";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Base types every byte stream can be checked against.
pub const TYPES: [&str; 2] = [TEXT_PLAIN, OCTET_STREAM];

pub mod check;
