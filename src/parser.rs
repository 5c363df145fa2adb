//! Structural parsers: format-specific code that maps the inside of a match.
//!
//! A parser lazily produces [`Submatch`]es. Whoever drives it wraps the
//! iterator in [`Observed`] so an observer (the debugger, or nothing at all)
//! sees every element before the consumer does.

use std::fmt;

use fnv::FnvHashMap;

use crate::magic::{Direct, Match};
use crate::MIME;

/// One region found by a structural parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submatch {
    pub name: String,
    pub offset: u64,
    pub length: u64,
    pub value: String,
}

impl fmt::Display for Submatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}+{}: {}", self.name, self.offset, self.length, self.value)
    }
}

pub trait StructureParser {
    fn name(&self) -> &str;

    /// Parses the structure that begins at `m`.
    fn parse<'d>(&self, data: &'d [u8], m: &Match) -> Box<dyn Iterator<Item = Submatch> + 'd>;
}

/// Sees a parser's output as it is produced.
pub trait ParseObserver {
    fn parse_started(&mut self, _parser: &str, _data: &[u8], _m: &Match) {}

    fn submatch(&mut self, _parser: &str, _submatch: &Submatch) {}

    fn parse_finished(&mut self, _parser: &str, _m: &Match) {}
}

impl ParseObserver for Direct {}

/// Routes every element of a parser's output through a [`ParseObserver`].
pub struct Observed<'a, 'd> {
    parser: &'a str,
    data: &'d [u8],
    m: Match,
    inner: Box<dyn Iterator<Item = Submatch> + 'd>,
    observer: &'a mut dyn ParseObserver,
    started: bool,
    finished: bool,
}

impl<'a, 'd> Observed<'a, 'd> {
    pub fn new(
        parser: &'a dyn StructureParser,
        data: &'d [u8],
        m: &Match,
        observer: &'a mut dyn ParseObserver,
    ) -> Observed<'a, 'd> {
        Observed {
            parser: parser.name(),
            data,
            m: *m,
            inner: parser.parse(data, m),
            observer,
            started: false,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if self.started && !self.finished {
            self.finished = true;
            self.observer.parse_finished(self.parser, &self.m);
        }
    }
}

impl<'a, 'd> Iterator for Observed<'a, 'd> {
    type Item = Submatch;

    fn next(&mut self) -> Option<Submatch> {
        if self.finished {
            return None;
        }
        if !self.started {
            self.started = true;
            self.observer.parse_started(self.parser, self.data, &self.m);
        }
        match self.inner.next() {
            Some(submatch) => {
                self.observer.submatch(self.parser, &submatch);
                Some(submatch)
            }
            None => {
                self.finish();
                None
            }
        }
    }
}

impl<'a, 'd> Drop for Observed<'a, 'd> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Structural parsers by the MIME type they understand.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: FnvHashMap<MIME, Vec<Box<dyn StructureParser>>>,
}

impl ParserRegistry {
    pub fn new() -> ParserRegistry {
        ParserRegistry::default()
    }

    /// A registry holding the parsers shipped with this crate.
    pub fn with_builtin() -> ParserRegistry {
        let mut registry = ParserRegistry::new();
        registry.register("image/png", Box::new(PngChunks));
        registry
    }

    pub fn register(&mut self, mime: &str, parser: Box<dyn StructureParser>) {
        self.parsers.entry(mime.to_string()).or_default().push(parser);
    }

    pub fn parsers_for(&self, mime: &str) -> &[Box<dyn StructureParser>] {
        self.parsers.get(mime).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

/// Splits a PNG stream into its chunks.
pub struct PngChunks;

const PNG_SIGNATURE_LEN: u64 = 8;

impl StructureParser for PngChunks {
    fn name(&self) -> &str {
        "PNG chunks"
    }

    fn parse<'d>(&self, data: &'d [u8], m: &Match) -> Box<dyn Iterator<Item = Submatch> + 'd> {
        let mut offset = m.offset + PNG_SIGNATURE_LEN;
        let mut done = false;
        Box::new(std::iter::from_fn(move || {
            if done {
                return None;
            }
            let start = usize::try_from(offset).ok()?;
            let header = data.get(start..start.checked_add(8)?)?;
            let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let kind = String::from_utf8_lossy(&header[4..8]).into_owned();
            // length, type and CRC surround the chunk data
            let total = u64::from(length) + 12;
            if (data.len() as u64) < offset + total {
                done = true;
                return None;
            }
            let chunk = Submatch {
                name: kind,
                offset,
                length: total,
                value: format!("{} byte(s) of chunk data", length),
            };
            done = chunk.name == "IEND";
            offset += total;
            Some(chunk)
        }))
    }
}
