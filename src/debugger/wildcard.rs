//! `*` and `?` globs over MIME types.

use std::fmt;

use regex::Regex;

#[derive(Debug, Clone)]
pub enum Wildcard {
    Constant(String),
    Glob { raw: String, regex: Regex },
}

impl Wildcard {
    /// `*` matches any run of characters, `?` exactly one; `\*` and `\?` are literal.
    pub fn parse(pattern: &str) -> Wildcard {
        if !pattern.contains('*') && !pattern.contains('?') {
            return Wildcard::Constant(pattern.to_string());
        }
        let mut source = String::from("^");
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if matches!(chars.peek(), Some('*') | Some('?')) => {
                    literal.extend(chars.next());
                }
                '*' | '?' => {
                    source.push_str(&regex::escape(&literal));
                    literal.clear();
                    source.push_str(if c == '*' { ".*" } else { "." });
                }
                _ => literal.push(c),
            }
        }
        source.push_str(&regex::escape(&literal));
        source.push('$');
        match Regex::new(&source) {
            Ok(regex) => Wildcard::Glob { raw: pattern.to_string(), regex },
            // every literal was escaped, so this cannot happen
            Err(_) => Wildcard::Constant(pattern.to_string()),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Wildcard::Constant(s) => s == candidate,
            Wildcard::Glob { regex, .. } => regex.is_match(candidate),
        }
    }

    pub fn is_contained_in<'a>(&self, items: impl IntoIterator<Item = &'a str>) -> bool {
        items.into_iter().any(|item| self.matches(item))
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wildcard::Constant(s) => f.write_str(s),
            Wildcard::Glob { raw, .. } => f.write_str(raw),
        }
    }
}
