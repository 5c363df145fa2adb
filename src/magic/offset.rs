//! Byte positions of magic tests.

use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::tag_no_case;
use nom::character::complete::{char, digit1, hex_digit1, oct_digit1, one_of};
use nom::combinator::{all_consuming, map_res, opt};
use nom::sequence::{preceded, terminated};
use nom::IResult;

use super::Match;
use crate::error::{DefinitionErrorKind, OffsetError};

/// Where a test looks in the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    /// A fixed position from the start of the data.
    Absolute(u64),
    /// A signed distance from the end of the parent test's match.
    RelativeToLastMatch(i64),
}

impl Offset {
    /// Parses the offset column of a definition line.
    ///
    /// Indirect offsets (`(0x3c.l)`, `&(4.s)`) are rejected rather than guessed at.
    pub fn parse(text: &str) -> Result<Offset, DefinitionErrorKind> {
        let text = text.trim();
        if text.starts_with('(') || text.starts_with("&(") {
            return Err(DefinitionErrorKind::UnsupportedIndirectOffset(text.to_string()));
        }
        let malformed = || DefinitionErrorKind::MalformedOffset(text.to_string());
        match text.strip_prefix('&') {
            Some(delta) => {
                let delta = parse_numeric(delta).ok_or_else(malformed)?;
                i64::try_from(delta)
                    .map(Offset::RelativeToLastMatch)
                    .map_err(|_| malformed())
            }
            None => {
                if text.starts_with('-') || text.starts_with('+') {
                    return Err(malformed());
                }
                let value = parse_numeric(text).ok_or_else(malformed)?;
                u64::try_from(value).map(Offset::Absolute).map_err(|_| malformed())
            }
        }
    }

    /// Resolves this offset against the match of the enclosing test.
    pub fn to_absolute(&self, last_match: Option<&Match>) -> Result<u64, OffsetError> {
        match *self {
            Offset::Absolute(offset) => Ok(offset),
            Offset::RelativeToLastMatch(delta) => {
                let last =
                    last_match.ok_or_else(|| OffsetError::NoPreviousMatch(self.to_string()))?;
                let base = last.end();
                let resolved = i128::from(base) + i128::from(delta);
                u64::try_from(resolved).map_err(|_| OffsetError::BeforeStart {
                    offset: self.to_string(),
                    base,
                })
            }
        }
    }

    pub fn is_relative(&self) -> bool {
        matches!(self, Offset::RelativeToLastMatch(_))
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Offset::Absolute(offset) => write!(f, "{}", offset),
            Offset::RelativeToLastMatch(delta) => write!(f, "&{}", delta),
        }
    }
}

// Unsigned literal: 0x hex, leading-zero octal, or decimal
fn unsigned_literal(input: &str) -> IResult<&str, u128> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |s| u128::from_str_radix(s, 16)),
        map_res(preceded(char('0'), oct_digit1), |s| u128::from_str_radix(s, 8)),
        map_res(digit1, |s: &str| s.parse::<u128>()),
    ))(input)
}

// Some definitions end constants with `L`, and a few hex constants with `h`
fn numeric_literal(input: &str) -> IResult<&str, u128> {
    terminated(unsigned_literal, opt(one_of("LlHh")))(input)
}

/// Parses a libmagic numeric literal with an optional sign.
///
/// Returns `None` if the text is not entirely a number.
pub fn parse_numeric(text: &str) -> Option<i128> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (_, magnitude) = all_consuming(numeric_literal)(digits).ok()?;
    let magnitude = i128::try_from(magnitude).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
