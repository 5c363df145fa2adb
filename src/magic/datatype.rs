//! The data types a magic test can compare against: strings, regular
//! expressions, integers and floats.
//!
//! Each type knows how to parse the expected-value column of a definition
//! line and how to test a slice of data (starting at the resolved offset)
//! against it, returning the consumed prefix on success.

use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as _;

use regex::bytes::{Regex, RegexBuilder};

use super::offset::parse_numeric;
use crate::error::DefinitionErrorKind;

/// libmagic limits regex searches to 8KiB unless told otherwise.
const DEFAULT_REGEX_BYTES: usize = 8 * 1024;
/// libmagic assumes 80 bytes per line when a regex limit is given in lines.
const BYTES_PER_LINE: usize = 80;

const WHITESPACE: &[u8] = b" \r\t\n\x0b\x0c";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Native,
    Little,
    Big,
}

impl Endianness {
    fn prefix(self) -> &'static str {
        match self {
            Endianness::Native => "",
            Endianness::Little => "le",
            Endianness::Big => "be",
        }
    }

    fn is_little(self) -> bool {
        match self {
            Endianness::Native => cfg!(target_endian = "little"),
            Endianness::Little => true,
            Endianness::Big => false,
        }
    }
}

/// Comparison applied between the value read from the data and the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericOperator {
    Equals,
    LessThan,
    GreaterThan,
    /// Every bit set in the expected value is set in the data.
    BitwiseAnd,
    /// Every bit set in the expected value is clear in the data.
    BitwiseXor,
    NotEquals,
}

impl NumericOperator {
    pub fn from_symbol(symbol: char) -> Option<NumericOperator> {
        match symbol {
            '=' => Some(NumericOperator::Equals),
            '<' => Some(NumericOperator::LessThan),
            '>' => Some(NumericOperator::GreaterThan),
            '&' => Some(NumericOperator::BitwiseAnd),
            '^' => Some(NumericOperator::BitwiseXor),
            '!' => Some(NumericOperator::NotEquals),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            NumericOperator::Equals => '=',
            NumericOperator::LessThan => '<',
            NumericOperator::GreaterThan => '>',
            NumericOperator::BitwiseAnd => '&',
            NumericOperator::BitwiseXor => '^',
            NumericOperator::NotEquals => '!',
        }
    }

    fn test_ordering(self, ordering: Ordering) -> bool {
        match self {
            NumericOperator::Equals => ordering == Ordering::Equal,
            NumericOperator::NotEquals => ordering != Ordering::Equal,
            NumericOperator::LessThan => ordering == Ordering::Less,
            NumericOperator::GreaterThan => ordering == Ordering::Greater,
            NumericOperator::BitwiseAnd | NumericOperator::BitwiseXor => false,
        }
    }
}

/// Coarse classification used by the instrumentation registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestKind {
    String,
    Regex,
    Integer,
    Float,
}

impl TestKind {
    pub const ALL: [TestKind; 4] =
        [TestKind::String, TestKind::Regex, TestKind::Integer, TestKind::Float];
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    String {
        case_insensitive: bool,
        compact_whitespace: bool,
        optional_blanks: bool,
    },
    Regex {
        /// Bytes (or lines, with `limit_lines`) to search; `None` for the default.
        limit: Option<usize>,
        case_insensitive: bool,
        match_to_start: bool,
        limit_lines: bool,
    },
    Integer {
        width: u8,
        signed: bool,
        endianness: Endianness,
        mask: Option<u64>,
    },
    Float {
        width: u8,
        endianness: Endianness,
    },
}

/// A parsed expected-value column.
#[derive(Debug, Clone)]
pub enum ExpectedValue {
    /// `x`: matches anything.
    Any,
    String { bytes: Vec<u8>, op: NumericOperator },
    Regex { source: String, regex: Regex },
    Integer { value: u64, op: NumericOperator },
    Float { value: f64, op: NumericOperator },
}

impl DataType {
    /// Parses the data type column of a definition line.
    pub fn parse(name: &str) -> Result<DataType, DefinitionErrorKind> {
        let unknown = || DefinitionErrorKind::UnknownDataType(name.to_string());
        if let Some(rest) = name.strip_prefix("string").or_else(|| name.strip_prefix("ustring")) {
            return parse_string_type(name, rest);
        }
        if let Some(rest) = name.strip_prefix("regex") {
            return parse_regex_type(rest).ok_or_else(unknown);
        }
        parse_numeric_type(name).ok_or_else(unknown)
    }

    pub fn kind(&self) -> TestKind {
        match self {
            DataType::String { .. } => TestKind::String,
            DataType::Regex { .. } => TestKind::Regex,
            DataType::Integer { .. } => TestKind::Integer,
            DataType::Float { .. } => TestKind::Float,
        }
    }

    /// Parses the expected-value column for this data type.
    pub fn parse_expected(&self, spec: &str) -> Result<ExpectedValue, DefinitionErrorKind> {
        let malformed = |reason: &str| DefinitionErrorKind::MalformedExpected {
            value: spec.to_string(),
            reason: reason.to_string(),
        };
        if spec.trim() == "x" {
            return Ok(ExpectedValue::Any);
        }
        match *self {
            DataType::String { .. } => {
                let (op, literal) = split_operator(spec);
                let op = match op {
                    NumericOperator::BitwiseAnd | NumericOperator::BitwiseXor => {
                        return Err(malformed("strings cannot be compared bitwise"))
                    }
                    op => op,
                };
                let bytes = unescape(literal).map_err(|e| malformed(&e))?;
                Ok(ExpectedValue::String { bytes, op })
            }
            DataType::Regex { case_insensitive, .. } => {
                let source = regex_source(spec);
                let regex = RegexBuilder::new(&source)
                    .case_insensitive(case_insensitive)
                    .multi_line(true)
                    .unicode(false)
                    .build()
                    .map_err(|e| malformed(&e.to_string()))?;
                Ok(ExpectedValue::Regex { source, regex })
            }
            DataType::Integer { width, .. } => {
                let (op, literal) = split_operator(spec);
                let literal = literal.trim();
                let bits = width_mask(width);
                let value = match literal.strip_prefix('~') {
                    Some(rest) => {
                        let v = parse_numeric(rest).ok_or_else(|| malformed("not an integer"))?;
                        !(v as u64) & bits
                    }
                    None => {
                        let v = parse_numeric(literal).ok_or_else(|| malformed("not an integer"))?;
                        (v as u64) & bits
                    }
                };
                Ok(ExpectedValue::Integer { value, op })
            }
            DataType::Float { .. } => {
                let (op, literal) = split_operator(spec);
                if matches!(op, NumericOperator::BitwiseAnd | NumericOperator::BitwiseXor) {
                    return Err(malformed("a floating point value cannot be compared bitwise"));
                }
                let value = literal
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| malformed("not a floating point number"))?;
                Ok(ExpectedValue::Float { value, op })
            }
        }
    }

    /// Tests `data` (already sliced at the test's absolute offset) and returns
    /// the consumed prefix if it matches.
    pub fn matches<'d>(&self, data: &'d [u8], expected: &ExpectedValue) -> Option<&'d [u8]> {
        match (self, expected) {
            (DataType::String { .. }, ExpectedValue::Any) => {
                let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                Some(&data[..end])
            }
            (
                DataType::String { case_insensitive, compact_whitespace, optional_blanks },
                ExpectedValue::String { bytes, op },
            ) => {
                let flags = StringFlags {
                    case_insensitive: *case_insensitive,
                    compact_whitespace: *compact_whitespace,
                    optional_blanks: *optional_blanks,
                };
                match op {
                    NumericOperator::Equals => flags.match_prefix(data, bytes).map(|n| &data[..n]),
                    NumericOperator::NotEquals => match flags.match_prefix(data, bytes) {
                        Some(_) => None,
                        None => Some(&data[..bytes.len().min(data.len())]),
                    },
                    op => {
                        let window = &data[..bytes.len().min(data.len())];
                        if op.test_ordering(window.cmp(bytes.as_slice())) {
                            Some(window)
                        } else {
                            None
                        }
                    }
                }
            }
            (DataType::Regex { .. }, ExpectedValue::Any) => Some(&data[..0]),
            (DataType::Regex { match_to_start, .. }, ExpectedValue::Regex { regex, .. }) => {
                let window = &data[..self.regex_window(data)];
                let found = regex.find(window)?;
                let end = if *match_to_start { found.start() } else { found.end() };
                Some(&data[..end])
            }
            (DataType::Integer { width, signed, endianness, mask }, expected) => {
                let width = usize::from(*width);
                let raw = read_uint(data.get(..width)?, endianness.is_little());
                let raw = mask.map_or(raw, |m| raw & m);
                let matched = match expected {
                    ExpectedValue::Any => true,
                    ExpectedValue::Integer { value, op } => {
                        compare_integers(raw, *value, *op, *signed, width)
                    }
                    _ => false,
                };
                if matched {
                    Some(&data[..width])
                } else {
                    None
                }
            }
            (DataType::Float { width, endianness }, expected) => {
                let width = usize::from(*width);
                let raw = read_uint(data.get(..width)?, endianness.is_little());
                let matched = match expected {
                    ExpectedValue::Any => true,
                    ExpectedValue::Float { value, op } => compare_floats(raw, *value, *op, width),
                    _ => false,
                };
                if matched {
                    Some(&data[..width])
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Describes, step by step, how `data` is tested against `expected`.
    pub fn explain(&self, data: &[u8], expected: &ExpectedValue) -> String {
        let mut out = String::new();
        let result = self.matches(data, expected);
        match self {
            DataType::Integer { width, signed, endianness, mask } => {
                let w = usize::from(*width);
                match data.get(..w) {
                    None => {
                        let _ = writeln!(out, "need {} bytes but only {} remain", w, data.len());
                    }
                    Some(bytes) => {
                        let raw = read_uint(bytes, endianness.is_little());
                        let _ = writeln!(
                            out,
                            "read {} as {} {}-byte {} integer = {:#x} ({})",
                            escape_bytes(bytes),
                            if endianness.is_little() { "little-endian" } else { "big-endian" },
                            width,
                            if *signed { "signed" } else { "unsigned" },
                            raw,
                            if *signed { sign_extend(raw, w).to_string() } else { raw.to_string() }
                        );
                        if let Some(m) = mask {
                            let _ = writeln!(out, "apply mask {:#x} = {:#x}", m, raw & m);
                        }
                    }
                }
            }
            DataType::Float { width, endianness } => {
                let w = usize::from(*width);
                match data.get(..w) {
                    None => {
                        let _ = writeln!(out, "need {} bytes but only {} remain", w, data.len());
                    }
                    Some(bytes) => {
                        let raw = read_uint(bytes, endianness.is_little());
                        let value = decode_float(raw, w);
                        let shown = escape_bytes(bytes);
                        let _ = writeln!(out, "read {} as {} = {}", shown, self, value);
                    }
                }
            }
            DataType::String { .. } => {
                let shown = data.len().min(32);
                let _ = writeln!(out, "data begins {}", escape_bytes(&data[..shown]));
            }
            DataType::Regex { .. } => {
                let window = self.regex_window(data);
                let _ = writeln!(out, "searching the first {} bytes", window);
            }
        }
        let _ = write!(out, "test {} {}: ", self, expected);
        match result {
            Some(consumed) => {
                let _ = writeln!(out, "matched, consuming {} byte(s)", consumed.len());
            }
            None => {
                let _ = writeln!(out, "no match");
            }
        }
        out
    }

    fn regex_window(&self, data: &[u8]) -> usize {
        match *self {
            DataType::Regex { limit, limit_lines: true, .. } => {
                let lines = limit.unwrap_or(DEFAULT_REGEX_BYTES / BYTES_PER_LINE);
                let byte_limit = data.len().min(lines.saturating_mul(BYTES_PER_LINE));
                data[..byte_limit]
                    .iter()
                    .enumerate()
                    .filter(|(_, &b)| b == b'\n')
                    .nth(lines.saturating_sub(1))
                    .map_or(byte_limit, |(i, _)| i + 1)
            }
            DataType::Regex { limit, .. } => data.len().min(limit.unwrap_or(DEFAULT_REGEX_BYTES)),
            _ => data.len(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DataType::String { case_insensitive, compact_whitespace, optional_blanks } => {
                f.write_str("string")?;
                if case_insensitive || compact_whitespace || optional_blanks {
                    f.write_str("/")?;
                    if compact_whitespace {
                        f.write_str("W")?;
                    }
                    if optional_blanks {
                        f.write_str("w")?;
                    }
                    if case_insensitive {
                        f.write_str("c")?;
                    }
                }
                Ok(())
            }
            DataType::Regex { limit, case_insensitive, match_to_start, limit_lines } => {
                f.write_str("regex")?;
                if limit.is_some() || case_insensitive || match_to_start || limit_lines {
                    f.write_str("/")?;
                    if let Some(limit) = limit {
                        write!(f, "{}", limit)?;
                    }
                    if case_insensitive {
                        f.write_str("c")?;
                    }
                    if match_to_start {
                        f.write_str("s")?;
                    }
                    if limit_lines {
                        f.write_str("l")?;
                    }
                }
                Ok(())
            }
            DataType::Integer { width, signed, endianness, mask } => {
                let base = match width {
                    1 => "byte",
                    2 => "short",
                    4 => "long",
                    _ => "quad",
                };
                write!(f, "{}{}{}", if signed { "" } else { "u" }, endianness.prefix(), base)?;
                if let Some(mask) = mask {
                    write!(f, "&{:#x}", mask)?;
                }
                Ok(())
            }
            DataType::Float { width, endianness } => {
                let base = if width == 4 { "float" } else { "double" };
                write!(f, "{}{}", endianness.prefix(), base)
            }
        }
    }
}

impl fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedValue::Any => f.write_str("x"),
            ExpectedValue::String { bytes, op } => {
                let needs_equals = bytes.as_slice() == b"x"
                    || bytes.first().map_or(false, |b| b"=<>!&^~".contains(b));
                if *op != NumericOperator::Equals || needs_equals {
                    write!(f, "{}", op.symbol())?;
                }
                f.write_str(&escape_bytes(bytes))
            }
            ExpectedValue::Regex { source, .. } => f.write_str(&source.replace(' ', "\\ ")),
            ExpectedValue::Integer { value, op } => {
                if *op != NumericOperator::Equals {
                    write!(f, "{}", op.symbol())?;
                }
                write!(f, "{:#x}", value)
            }
            ExpectedValue::Float { value, op } => {
                if *op != NumericOperator::Equals {
                    write!(f, "{}", op.symbol())?;
                }
                write!(f, "{:?}", value)
            }
        }
    }
}

impl PartialEq for ExpectedValue {
    fn eq(&self, other: &ExpectedValue) -> bool {
        match (self, other) {
            (ExpectedValue::Any, ExpectedValue::Any) => true,
            (
                ExpectedValue::String { bytes: a, op: x },
                ExpectedValue::String { bytes: b, op: y },
            ) => a == b && x == y,
            (ExpectedValue::Regex { source: a, .. }, ExpectedValue::Regex { source: b, .. }) => {
                a == b
            }
            (
                ExpectedValue::Integer { value: a, op: x },
                ExpectedValue::Integer { value: b, op: y },
            ) => a == b && x == y,
            (
                ExpectedValue::Float { value: a, op: x },
                ExpectedValue::Float { value: b, op: y },
            ) => a.to_bits() == b.to_bits() && x == y,
            _ => false,
        }
    }
}

/// A data type paired with the value it is expected to find.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub data_type: DataType,
    pub expected: ExpectedValue,
}

impl Pattern {
    pub fn parse(data_type: &str, expected: &str) -> Result<Pattern, DefinitionErrorKind> {
        let data_type = DataType::parse(data_type)?;
        let expected = data_type.parse_expected(expected)?;
        Ok(Pattern { data_type, expected })
    }

    pub fn matches<'d>(&self, data: &'d [u8]) -> Option<&'d [u8]> {
        self.data_type.matches(data, &self.expected)
    }

    pub fn explain(&self, data: &[u8]) -> String {
        self.data_type.explain(data, &self.expected)
    }

    pub fn kind(&self) -> TestKind {
        self.data_type.kind()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.data_type, self.expected)
    }
}

struct StringFlags {
    case_insensitive: bool,
    compact_whitespace: bool,
    optional_blanks: bool,
}

impl StringFlags {
    /// Returns how many bytes of `data` the pattern consumed.
    fn match_prefix(&self, data: &[u8], pattern: &[u8]) -> Option<usize> {
        let (mut i, mut j) = (0, 0);
        while j < pattern.len() {
            let p = pattern[j];
            if self.compact_whitespace && WHITESPACE.contains(&p) {
                // a run of pattern whitespace needs at least one whitespace byte in the data
                if !data.get(i).map_or(false, |d| WHITESPACE.contains(d)) {
                    return None;
                }
                while data.get(i).map_or(false, |d| WHITESPACE.contains(d)) {
                    i += 1;
                }
                while pattern.get(j).map_or(false, |c| WHITESPACE.contains(c)) {
                    j += 1;
                }
                continue;
            }
            if self.optional_blanks && p == b' ' {
                if data.get(i) == Some(&b' ') {
                    i += 1;
                }
                j += 1;
                continue;
            }
            let d = *data.get(i)?;
            let equal = if self.case_insensitive { d.eq_ignore_ascii_case(&p) } else { d == p };
            if !equal {
                return None;
            }
            i += 1;
            j += 1;
        }
        Some(i)
    }
}

fn parse_string_type(name: &str, rest: &str) -> Result<DataType, DefinitionErrorKind> {
    let mut case_insensitive = false;
    let mut compact_whitespace = false;
    let mut optional_blanks = false;
    if !rest.is_empty() {
        let flags = rest
            .strip_prefix('/')
            .ok_or_else(|| DefinitionErrorKind::UnknownDataType(name.to_string()))?;
        for flag in flags.chars() {
            match flag {
                'c' | 'C' => case_insensitive = true,
                'W' => compact_whitespace = true,
                'w' => optional_blanks = true,
                'b' | 'B' | 't' | 'T' | 'f' | '/' => {
                    log::debug!("{:?}: ignoring string flag {:?}", name, flag)
                }
                other => {
                    log::warn!("{:?} has an invalid option that will be ignored: {}", name, other)
                }
            }
        }
    }
    if compact_whitespace && optional_blanks {
        return Err(DefinitionErrorKind::UnknownDataType(format!(
            "{} (`W` and `w` cannot be combined)",
            name
        )));
    }
    Ok(DataType::String { case_insensitive, compact_whitespace, optional_blanks })
}

fn parse_regex_type(rest: &str) -> Option<DataType> {
    let mut limit = None;
    let mut case_insensitive = false;
    let mut match_to_start = false;
    let mut limit_lines = false;
    if !rest.is_empty() {
        let spec = rest.strip_prefix('/')?;
        let digits_end = spec.find(|c: char| !c.is_ascii_digit()).unwrap_or(spec.len());
        if digits_end > 0 {
            limit = Some(spec[..digits_end].parse().ok()?);
        }
        for flag in spec[digits_end..].chars() {
            match flag {
                'c' => case_insensitive = true,
                's' => match_to_start = true,
                'l' => limit_lines = true,
                'T' | 'b' => log::debug!("regex{}: ignoring flag {:?}", rest, flag),
                _ => return None,
            }
        }
    }
    Some(DataType::Regex { limit, case_insensitive, match_to_start, limit_lines })
}

fn parse_numeric_type(name: &str) -> Option<DataType> {
    let (base, mask) = match name.split_once('&') {
        Some((base, mask)) => (base, Some(parse_numeric(mask)? as u64)),
        None => (name, None),
    };
    let (unsigned, base) = match base.strip_prefix('u') {
        Some(rest) => (true, rest),
        None => (false, base),
    };
    let (endianness, base) = if let Some(rest) = base.strip_prefix("le") {
        (Endianness::Little, rest)
    } else if let Some(rest) = base.strip_prefix("be") {
        (Endianness::Big, rest)
    } else {
        (Endianness::Native, base)
    };
    let width = match base {
        "byte" => 1,
        "short" => 2,
        "long" => 4,
        "quad" => 8,
        "float" | "double" => {
            if unsigned || mask.is_some() {
                return None;
            }
            let width = if base == "float" { 4 } else { 8 };
            return Some(DataType::Float { width, endianness });
        }
        _ => return None,
    };
    Some(DataType::Integer { width, signed: !unsigned, endianness, mask })
}

fn split_operator(spec: &str) -> (NumericOperator, &str) {
    let mut chars = spec.chars();
    match chars.next().and_then(NumericOperator::from_symbol) {
        Some(op) => (op, chars.as_str()),
        None => (NumericOperator::Equals, spec),
    }
}

// Regex sources keep their escapes for the regex engine; only `\ ` is a DSL escape
fn regex_source(spec: &str) -> String {
    spec.replace("\\ ", " ")
}

fn width_mask(width: u8) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (u32::from(width) * 8)) - 1
    }
}

fn read_uint(bytes: &[u8], little: bool) -> u64 {
    let fold = |acc: u64, &b: &u8| (acc << 8) | u64::from(b);
    if little {
        bytes.iter().rev().fold(0, fold)
    } else {
        bytes.iter().fold(0, fold)
    }
}

fn sign_extend(value: u64, width: usize) -> i64 {
    let shift = 64 - (width as u32) * 8;
    ((value << shift) as i64) >> shift
}

fn compare_integers(
    actual: u64,
    expected: u64,
    op: NumericOperator,
    signed: bool,
    width: usize,
) -> bool {
    match op {
        NumericOperator::BitwiseAnd => actual & expected == expected,
        NumericOperator::BitwiseXor => actual & expected == 0,
        op => {
            let ordering = if signed {
                sign_extend(actual, width).cmp(&sign_extend(expected, width))
            } else {
                actual.cmp(&expected)
            };
            op.test_ordering(ordering)
        }
    }
}

fn decode_float(raw: u64, width: usize) -> f64 {
    if width == 4 {
        f64::from(f32::from_bits(raw as u32))
    } else {
        f64::from_bits(raw)
    }
}

fn compare_floats(raw: u64, expected: f64, op: NumericOperator, width: usize) -> bool {
    let ordering = if width == 4 {
        f32::from_bits(raw as u32).partial_cmp(&(expected as f32))
    } else {
        f64::from_bits(raw).partial_cmp(&expected)
    };
    match ordering {
        Some(ordering) => op.test_ordering(ordering),
        // NaN only satisfies "not equal"
        None => op == NumericOperator::NotEquals,
    }
}

/// Processes the escapes of a definition literal: `\n \r \t \b \v \f \\ \0`,
/// octal `\NNN`, hex `\xHH` and escaped spaces.
pub fn unescape(text: &str) -> Result<Vec<u8>, String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        i += 1;
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let next = *bytes.get(i).ok_or_else(|| format!("unterminated escape in {:?}", text))?;
        i += 1;
        match next {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'v' => out.push(0x0b),
            b'f' => out.push(0x0c),
            b'x' => {
                let digits =
                    bytes[i..].iter().take(2).take_while(|b| b.is_ascii_hexdigit()).count();
                if digits == 0 {
                    return Err(format!("invalid \\x hex escape in {:?}", text));
                }
                let hex = std::str::from_utf8(&bytes[i..i + digits]).map_err(|e| e.to_string())?;
                out.push(u8::from_str_radix(hex, 16).map_err(|e| e.to_string())?);
                i += digits;
            }
            b'0'..=b'7' => {
                let start = i - 1;
                let digits = 1 + bytes[i..]
                    .iter()
                    .take(2)
                    .take_while(|b| (b'0'..=b'7').contains(*b))
                    .count();
                let octal =
                    std::str::from_utf8(&bytes[start..start + digits]).map_err(|e| e.to_string())?;
                let value = u16::from_str_radix(octal, 8).map_err(|e| e.to_string())?;
                out.push((value & 0xff) as u8);
                i = start + digits;
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Renders bytes the way they would be written in a definition file.
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b' ' => out.push_str("\\ "),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x21..=0x7e => out.push(char::from(b)),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(data_type: &str, expected: &str) -> Pattern {
        Pattern::parse(data_type, expected).unwrap()
    }

    #[test]
    fn unescape_sequences() {
        assert_eq!(unescape(r"a\nb\r\t\\\0").unwrap(), b"a\nb\r\t\\\0".to_vec());
        assert_eq!(unescape(r"\x89PNG").unwrap(), b"\x89PNG".to_vec());
        assert_eq!(unescape(r"\x4").unwrap(), vec![4]);
        assert_eq!(unescape(r"PK\003\004").unwrap(), b"PK\x03\x04".to_vec());
        assert_eq!(unescape(r"\177ELF").unwrap(), b"\x7fELF".to_vec());
        assert_eq!(unescape(r"a\ b").unwrap(), b"a b".to_vec());
        assert!(unescape("\\").is_err());
        assert!(unescape(r"\xzz").is_err());
    }

    #[test]
    fn escape_round_trip() {
        let raw = b"\x89PNG\r\n\x1a\n a\\b";
        assert_eq!(unescape(&escape_bytes(raw)).unwrap(), raw.to_vec());
    }

    #[test]
    fn parse_type_names() {
        assert_eq!(
            DataType::parse("ubelong").unwrap(),
            DataType::Integer { width: 4, signed: false, endianness: Endianness::Big, mask: None }
        );
        assert_eq!(
            DataType::parse("leshort").unwrap(),
            DataType::Integer { width: 2, signed: true, endianness: Endianness::Little, mask: None }
        );
        assert_eq!(
            DataType::parse("belong&0xffff0000").unwrap(),
            DataType::Integer {
                width: 4,
                signed: true,
                endianness: Endianness::Big,
                mask: Some(0xffff_0000),
            }
        );
        assert_eq!(
            DataType::parse("bedouble").unwrap(),
            DataType::Float { width: 8, endianness: Endianness::Big }
        );
        assert_eq!(
            DataType::parse("string/Wc").unwrap(),
            DataType::String {
                case_insensitive: true,
                compact_whitespace: true,
                optional_blanks: false,
            }
        );
        assert_eq!(
            DataType::parse("regex/4cl").unwrap(),
            DataType::Regex {
                limit: Some(4),
                case_insensitive: true,
                match_to_start: false,
                limit_lines: true,
            }
        );
        assert!(DataType::parse("ufloat").is_err());
        assert!(DataType::parse("string/Ww").is_err());
        assert!(matches!(DataType::parse("pstring"), Err(DefinitionErrorKind::UnknownDataType(_))));
    }

    #[test]
    fn type_names_display_canonically() {
        let names = [
            "string",
            "string/Wc",
            "regex",
            "regex/4cl",
            "ubelong",
            "byte",
            "lequad&0xff",
            "befloat",
        ];
        for name in names {
            assert_eq!(DataType::parse(name).unwrap().to_string(), name);
        }
    }

    #[test]
    fn string_equality() {
        let p = pattern("string", "ABCD");
        assert_eq!(p.matches(b"ABCDEF"), Some(&b"ABCD"[..]));
        assert_eq!(p.matches(b"ABXD"), None);
        assert_eq!(p.matches(b"ABC"), None);
    }

    #[test]
    fn string_flags() {
        let p = pattern("string/c", "hello");
        assert_eq!(p.matches(b"HeLLo world"), Some(&b"HeLLo"[..]));
        let p = pattern("string/W", r"a\ b");
        assert_eq!(p.matches(b"a   b"), Some(&b"a   b"[..]));
        assert_eq!(p.matches(b"ab"), None);
        let p = pattern("string/w", r"#!\ /bin/sh");
        assert_eq!(p.matches(b"#!/bin/sh"), Some(&b"#!/bin/sh"[..]));
        assert_eq!(p.matches(b"#! /bin/sh"), Some(&b"#! /bin/sh"[..]));
    }

    #[test]
    fn string_operators() {
        let p = pattern("string", "!MZ");
        assert_eq!(p.matches(b"PK"), Some(&b"PK"[..]));
        assert_eq!(p.matches(b"MZ\x90"), None);
        let p = pattern("string", ">\\0");
        assert!(p.matches(b"a").is_some());
        assert!(p.matches(b"\0").is_none());
        let p = pattern("string", "x");
        assert_eq!(p.matches(b"abc\0def"), Some(&b"abc"[..]));
    }

    #[test]
    fn integer_comparisons() {
        let p = pattern("beshort", "0xffd8");
        assert_eq!(p.matches(b"\xff\xd8\xff"), Some(&b"\xff\xd8"[..]));
        assert!(p.matches(b"\xd8\xff").is_none());
        assert!(p.matches(b"\xff").is_none());

        let p = pattern("leshort", "2");
        assert!(p.matches(b"\x02\x00").is_some());

        let p = pattern("byte", "<0");
        assert!(p.matches(b"\x80").is_some());
        let p = pattern("ubyte", "<0x10");
        assert!(p.matches(b"\x80").is_none());

        let p = pattern("byte", "-1");
        assert!(p.matches(b"\xff").is_some());

        let p = pattern("ubyte", "&0x81");
        assert!(p.matches(b"\x83").is_some());
        assert!(p.matches(b"\x03").is_none());

        let p = pattern("ubyte", "^0x80");
        assert!(p.matches(b"\x7f").is_some());
        assert!(p.matches(b"\x80").is_none());

        let p = pattern("ubelong&0xffff0000", "0x12340000");
        assert!(p.matches(b"\x12\x34\xab\xcd").is_some());
    }

    #[test]
    fn integer_complement_is_resolved_over_width() {
        let dt = DataType::parse("ubyte").unwrap();
        assert_eq!(
            dt.parse_expected("~0x0f").unwrap(),
            ExpectedValue::Integer { value: 0xf0, op: NumericOperator::Equals }
        );
        assert!(dt.matches(b"\xf0", &dt.parse_expected("~0x0f").unwrap()).is_some());
        let dt = DataType::parse("ubeshort").unwrap();
        assert_eq!(
            dt.parse_expected("!~0").unwrap(),
            ExpectedValue::Integer { value: 0, op: NumericOperator::NotEquals }
        );
    }

    #[test]
    fn floats() {
        let p = pattern("befloat", "1.5");
        assert!(p.matches(&1.5f32.to_be_bytes()).is_some());
        let p = pattern("ledouble", ">2.0");
        assert!(p.matches(&2.5f64.to_le_bytes()).is_some());
        assert!(p.matches(&1.0f64.to_le_bytes()).is_none());
        assert!(Pattern::parse("float", "&1").is_err());
    }

    #[test]
    fn regexes() {
        let p = pattern("regex", r"^<\?xml[\ \t]");
        assert_eq!(p.matches(b"<?xml version"), Some(&b"<?xml "[..]));
        let p = pattern("regex/c", "hello");
        assert_eq!(p.matches(b"say HELLO!"), Some(&b"say HELLO"[..]));
        let p = pattern("regex/s", "hello");
        assert_eq!(p.matches(b"say hello"), Some(&b"say "[..]));
        let p = pattern("regex/4", "hello");
        assert!(p.matches(b"say hello").is_none());
        let p = pattern("regex/1l", "^two");
        assert!(p.matches(b"one\ntwo\n").is_none());
        let p = pattern("regex/2l", "^two");
        assert!(p.matches(b"one\ntwo\n").is_some());
        assert!(Pattern::parse("regex", "(").is_err());
    }

    #[test]
    fn huge_line_limits_cover_the_whole_buffer() {
        let p = pattern("regex/1000000000000000000l", "abc");
        assert_eq!(p.matches(b"xxabc"), Some(&b"xxabc"[..]));
        let p = pattern(&format!("regex/{}l", usize::MAX), "abc");
        assert!(p.matches(b"xxabc").is_some());
    }

    #[test]
    fn explain_mentions_the_value() {
        let p = pattern("ubyte", "0x42");
        let text = p.explain(b"\x41");
        assert!(text.contains("0x41"));
        assert!(text.contains("no match"));
    }
}
