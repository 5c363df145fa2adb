//! Loads definition files into a [`MagicTree`].
//!
//! One rule per line:
//!
//! ```text
//! >>&0    ubeshort    &0x8000    message text
//! !:mime  application/x-example
//! !:ext   exa/ex
//! ```

use std::fs;
use std::path::Path;

use log::debug;
use nom::bytes::complete::{escaped, take_till1};
use nom::character::complete::{anychar, char, none_of, space0, space1};
use nom::combinator::{recognize, verify};
use nom::multi::many0_count;
use nom::IResult;

use super::{MagicTree, Offset, Pattern, SourceInfo, TestId, TestNode};
use crate::error::{DefinitionError, DefinitionErrorKind};

const OPERATORS: &str = "=<>&^!~";

/// The columns of a rule line, before any of them is interpreted.
#[derive(Debug, PartialEq, Eq)]
struct RawTest<'a> {
    level: usize,
    offset: &'a str,
    data_type: &'a str,
    expected: String,
    message: &'a str,
}

// A whitespace-delimited token in which `\ ` does not end the token
fn escaped_token(input: &str) -> IResult<&str, &str> {
    recognize(escaped(none_of("\\ \t"), '\\', anychar))(input)
}

fn column(input: &str) -> IResult<&str, &str> {
    take_till1(char::is_whitespace)(input)
}

fn raw_test(input: &str) -> IResult<&str, RawTest<'_>> {
    let (input, level) = many0_count(char('>'))(input)?;
    let (input, offset) = verify(column, |s: &str| !s.starts_with('!'))(input)?;
    let (input, _) = space1(input)?;
    let (input, data_type) = column(input)?;
    let (input, _) = space1(input)?;
    let (input, operand) = escaped_token(input)?;
    let (input, _) = space0(input)?;
    let mut expected = operand.to_string();
    let mut input = input;
    // some definitions put whitespace between the operator and its value
    if !operand.is_empty() && operand.chars().all(|c| OPERATORS.contains(c)) && !input.is_empty() {
        let (rest, value) = escaped_token(input)?;
        let (rest, _) = space0(rest)?;
        expected.push_str(value);
        input = rest;
    }
    let message = input.trim_end();
    Ok(("", RawTest { level, offset, data_type, expected, message }))
}

/// Parses a single rule line into a detached test and its level.
pub fn parse_test_line(line: &str) -> Result<(usize, TestNode), DefinitionErrorKind> {
    let (_, raw) =
        raw_test(line.trim()).map_err(|_| DefinitionErrorKind::UnexpectedLine(line.to_string()))?;
    let offset = Offset::parse(raw.offset)?;
    let pattern = Pattern::parse(raw.data_type, &raw.expected)?;
    Ok((raw.level, TestNode::new(offset, pattern, raw.message)))
}

/// Parses definition text. `path` is only used to locate errors and tests.
pub fn from_str(text: &str, path: impl AsRef<Path>) -> Result<MagicTree, DefinitionError> {
    let path = path.as_ref();
    let mut tree = MagicTree::new();
    // the chain of tests a new line can attach to, innermost last
    let mut open: Vec<TestId> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let at = |kind: DefinitionErrorKind| DefinitionError::new(path, line_number, kind);
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some(directive) = trimmed.strip_prefix("!:") {
            let (name, value) = directive
                .split_once(char::is_whitespace)
                .map(|(n, v)| (n, v.trim()))
                .unwrap_or((directive, ""));
            match name {
                "mime" => {
                    let &current = open
                        .last()
                        .ok_or_else(|| at(DefinitionErrorKind::OrphanDirective("!:mime")))?;
                    value
                        .parse::<mime::Mime>()
                        .map_err(|_| at(DefinitionErrorKind::InvalidMime(value.to_string())))?;
                    tree.set_mime(current, value).map_err(at)?;
                }
                "ext" => {
                    let &current = open
                        .last()
                        .ok_or_else(|| at(DefinitionErrorKind::OrphanDirective("!:ext")))?;
                    let exts =
                        value.split(|c: char| c == '/' || c == ',').filter(|e| !e.is_empty());
                    for ext in exts {
                        tree.add_extension(current, ext);
                    }
                }
                other => debug!("{} line {}: ignoring !:{}", path.display(), line_number, other),
            }
            continue;
        }

        let (level, node) = parse_test_line(trimmed).map_err(at)?;
        let node = node.with_source(SourceInfo {
            path: path.to_path_buf(),
            line: line_number,
            text: line.to_string(),
        });
        while open.last().map_or(false, |&id| tree[id].level() >= level) {
            open.pop();
        }
        let id = match open.last() {
            None if level == 0 => tree.add_root(node),
            Some(&parent) if tree[parent].level() + 1 == level => tree.add_child(parent, node),
            _ => return Err(at(DefinitionErrorKind::InvalidLevel(level))),
        };
        open.push(id);
    }

    debug!("{}: loaded {} tests in {} trees", path.display(), tree.len(), tree.roots().len());
    Ok(tree)
}

/// Reads and parses a definition file.
pub fn from_filepath(path: &Path) -> Result<MagicTree, DefinitionError> {
    let text = fs::read_to_string(path).map_err(|e| DefinitionError::new(path, 0, e.into()))?;
    from_str(&text, path)
}

impl MagicTree {
    /// Appends the tests of another definition source.
    ///
    /// The source is parsed on its own first, so a malformed source leaves
    /// this tree exactly as it was.
    pub fn load(
        &mut self,
        text: &str,
        path: impl AsRef<Path>,
    ) -> Result<Vec<TestId>, DefinitionError> {
        let loaded = from_str(text, path)?;
        Ok(self.graft(loaded))
    }

    pub fn load_file(&mut self, path: &Path) -> Result<Vec<TestId>, DefinitionError> {
        let loaded = from_filepath(path)?;
        Ok(self.graft(loaded))
    }
}
