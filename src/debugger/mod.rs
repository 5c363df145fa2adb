//! An interactive debugger for magic test trees.
//!
//! A [`Debugger`] is a [`TestEvaluator`]: hand it to
//! [`MagicTree::match_with`] and every test it intercepts is recorded, may be
//! timed, and may stop at a prompt before its result reaches the walker. It is
//! also a [`ParseObserver`], so structural parsers run through
//! [`Observed`](crate::parser::Observed) can be stepped through element by
//! element.
//!
//! Nothing is intercepted until the debugger is entered, either with
//! [`Debugger::enter`]/[`Debugger::exit`] or through a [`DebugSession`] guard.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::Write as _;
use std::ops::{Deref, DerefMut};

use fnv::FnvHashMap;
use log::{debug, warn};
use tabwriter::TabWriter;

use crate::error::CommandError;
use crate::magic::{
    ruleset, MagicTree, Match, Offset, SourceInfo, TestEvaluator, TestId, TestKind, TestResult,
};
use crate::parser::{ParseObserver, Submatch};
use crate::profiling::{Profiler, ProfilerStack};

pub mod breakpoint;
pub mod instrument;
pub mod repl;
pub mod wildcard;

pub use breakpoint::{Breakpoint, TestContext};
pub use instrument::Instrumentation;
pub use repl::{Command, Console, Painter, ScriptedConsole, Terminal};
pub use wildcard::Wildcard;

const PROMPT: &str = "(tmagic) ";
const CONTEXT_BYTES: u64 = 32;
const ROW_BYTES: u64 = 16;

/// How far the walker runs before the next prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    /// Until a breakpoint fires.
    #[default]
    Running,
    /// Stop at every test.
    SingleStepping,
    /// Stop at the next test that matches.
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebuggerConfig {
    /// Prompt before a structural parser runs.
    pub break_on_parsing: bool,
    /// Time every intercepted test and parser.
    pub profile: bool,
    /// Style output with ANSI colours.
    pub color: bool,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        DebuggerConfig { break_on_parsing: true, profile: false, color: false }
    }
}

/// Session variables, as listed by `show`.
pub const VARIABLES: &[(&str, &str)] = &[
    (
        "break_on_parsing",
        "Break when a structural parser is about to be invoked and step through its output \
         (default=True; disable from the command line with `--no-debug-parsers`)",
    ),
    ("profile", "Profile the performance of each magic test that is run (default=False)"),
];

/// What a profiling result was measured for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProfileKey {
    Test(TestId),
    Parser(String),
}

/// The most recent test the walker evaluated.
#[derive(Debug, Clone)]
struct LastTest {
    node: TestId,
    offset: u64,
    parent_match: Option<Match>,
    result: TestResult,
}

impl LastTest {
    fn context<'a>(&'a self, tree: &'a MagicTree, data: &'a [u8]) -> TestContext<'a> {
        TestContext {
            tree,
            node: self.node,
            data,
            absolute_offset: self.offset,
            parent_match: self.parent_match.as_ref(),
            result: &self.result,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Walker,
    /// A one-off test typed at the prompt.
    Prompt,
}

enum Flow {
    Stay,
    Resume,
    Quit,
}

#[derive(Default)]
struct ParserRun {
    profiler: Option<Profiler>,
    stepping: bool,
    print_remaining: bool,
}

pub struct Debugger {
    console: Box<dyn Console>,
    config: DebuggerConfig,
    breakpoints: Vec<Breakpoint>,
    step_mode: StepMode,
    entries: usize,
    instrumentation: Instrumentation,
    intercepted_kinds: BTreeSet<TestKind>,
    last: Option<LastTest>,
    last_command: Option<String>,
    explain_next: bool,
    explain_until_break: bool,
    profile_results: FnvHashMap<ProfileKey, f64>,
    profilers: ProfilerStack,
    parser_run: Option<ParserRun>,
    quit: bool,
}

impl Debugger {
    /// A debugger talking to the terminal.
    pub fn new(config: DebuggerConfig) -> Debugger {
        Debugger::with_console(config, Terminal::new())
    }

    pub fn with_console(config: DebuggerConfig, console: impl Console + 'static) -> Debugger {
        Debugger {
            console: Box::new(console),
            config,
            breakpoints: Vec::new(),
            step_mode: StepMode::Running,
            entries: 0,
            instrumentation: Instrumentation::new(),
            intercepted_kinds: TestKind::ALL.into_iter().collect(),
            last: None,
            last_command: None,
            explain_next: false,
            explain_until_break: false,
            profile_results: FnvHashMap::default(),
            profilers: ProfilerStack::new(),
            parser_run: None,
            quit: false,
        }
    }

    pub fn config(&self) -> DebuggerConfig {
        self.config
    }

    pub fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    pub fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn add_breakpoint(&mut self, breakpoint: Breakpoint) {
        self.breakpoints.push(breakpoint);
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }

    /// Restricts interception to `kinds`. Tests of any other kind run directly:
    /// they never stop, are not profiled and do not become the last test.
    pub fn set_intercepted_kinds(&mut self, kinds: impl IntoIterator<Item = TestKind>) {
        self.intercepted_kinds = kinds.into_iter().collect();
        self.reinstall();
    }

    pub fn is_entered(&self) -> bool {
        self.entries > 0
    }

    /// Whether the user asked to quit, or input ran out.
    pub fn has_quit(&self) -> bool {
        self.quit
    }

    /// The test the walker evaluated most recently.
    pub fn last_test(&self) -> Option<TestId> {
        self.last.as_ref().map(|last| last.node)
    }

    pub fn last_result(&self) -> Option<&TestResult> {
        self.last.as_ref().map(|last| &last.result)
    }

    /// Forgets the last test, e.g. before matching a different buffer.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Timings so far, slowest first.
    pub fn profile_results(&self) -> Vec<(ProfileKey, f64)> {
        let mut results: Vec<(ProfileKey, f64)> =
            self.profile_results.iter().map(|(k, &ms)| (k.clone(), ms)).collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        results
    }

    /// Starts intercepting. Only the outermost call installs instrumentation.
    pub fn enter(&mut self) {
        self.entries += 1;
        if self.entries == 1 {
            self.install();
        }
    }

    pub fn write_banner(&mut self) {
        let p = self.paint();
        let banner = format!("tmagic {}", env!("CARGO_PKG_VERSION"));
        self.write(&format!("{}\n\nFor help, type \"help\".\n", p.magenta(&p.bold(&banner))));
    }

    /// Undoes one [`enter`](Debugger::enter). The outermost call uninstalls instrumentation.
    ///
    /// # Panics
    ///
    /// When called more times than `enter`.
    pub fn exit(&mut self) {
        assert!(self.entries > 0, "Debugger::exit called without a matching Debugger::enter");
        self.entries -= 1;
        if self.entries == 0 {
            self.instrumentation.uninstall();
        }
    }

    /// Enters the debugger until the returned guard is dropped.
    pub fn session(&mut self) -> DebugSession<'_> {
        self.enter();
        DebugSession { debugger: self }
    }

    fn intercepts_parsers(&self) -> bool {
        self.config.break_on_parsing || self.config.profile
    }

    fn install(&mut self) {
        let parsers = self.intercepts_parsers();
        self.instrumentation.install(self.intercepted_kinds.iter().copied(), parsers);
    }

    fn reinstall(&mut self) {
        if self.is_entered() {
            self.install();
        }
    }

    fn paint(&self) -> Painter {
        Painter { enabled: self.config.color }
    }

    fn write(&mut self, text: &str) {
        self.console.write(text);
    }

    fn write_error(&mut self, error: &CommandError) {
        let p = self.paint();
        self.write(&format!("{}\n", p.error(&error.to_string())));
    }

    fn intercept(
        &mut self,
        tree: &MagicTree,
        id: TestId,
        data: &[u8],
        absolute_offset: u64,
        parent_match: Option<&Match>,
        origin: Origin,
    ) -> TestResult {
        let node = &tree[id];
        if !self.instrumentation.intercepts(node.pattern.kind()) {
            return node.test(id, data, absolute_offset);
        }
        let explain = origin == Origin::Walker
            && (std::mem::take(&mut self.explain_next) || self.explain_until_break);
        let result = if explain {
            self.explain(tree, id, data, absolute_offset);
            node.test(id, data, absolute_offset)
        } else if origin == Origin::Prompt {
            node.test(id, data, absolute_offset)
        } else {
            self.timed(ProfileKey::Test(id), || node.test(id, data, absolute_offset))
        };
        if origin == Origin::Prompt {
            return result;
        }

        self.last = Some(LastTest {
            node: id,
            offset: absolute_offset,
            parent_match: parent_match.copied(),
            result: result.clone(),
        });
        if self.should_break(tree, data) {
            self.explain_until_break = false;
            self.repl(tree, data);
        }
        result
    }

    fn timed<T>(&mut self, key: ProfileKey, run: impl FnOnce() -> T) -> T {
        if !self.config.profile {
            return run();
        }
        let profiler = Profiler::new();
        self.profilers.enter(&profiler);
        let value = run();
        if let Err(e) = self.profilers.exit(&profiler) {
            warn!("profiling {:?}: {}", key, e);
        }
        self.record(key, &profiler);
        value
    }

    fn record(&mut self, key: ProfileKey, profiler: &Profiler) {
        match profiler.elapsed_ms() {
            Ok(ms) => {
                self.profile_results.insert(key, ms);
            }
            Err(e) => warn!("no timing for {:?}: {}", key, e),
        }
    }

    fn should_break(&self, tree: &MagicTree, data: &[u8]) -> bool {
        let Some(last) = &self.last else {
            return false;
        };
        let stepping = match self.step_mode {
            StepMode::Running => false,
            StepMode::SingleStepping => true,
            StepMode::Next => last.result.is_match(),
        };
        let ctx = last.context(tree, data);
        stepping || self.breakpoints.iter().any(|b| b.should_break(&ctx))
    }

    /// Reads and runs commands until one of them resumes matching.
    ///
    /// Input running out counts as `quit`.
    pub fn repl(&mut self, tree: &MagicTree, data: &[u8]) {
        let _unprofiled = self.profilers.unprofiled();
        if let Some(last) = self.last.clone() {
            self.write_where(tree, data, &last);
        }
        while !self.quit {
            let Some(input) = self.console.read_line(PROMPT) else {
                self.quit = true;
                break;
            };
            let line = match (input.trim(), &self.last_command) {
                ("", Some(previous)) => previous.clone(),
                ("", None) => continue,
                (line, _) => line.to_string(),
            };
            let flow = match repl::parse_command(&line) {
                Ok((command, args)) => {
                    self.last_command = Some(line.clone());
                    self.run_command(command, args, tree, data)
                }
                Err(e) => {
                    self.last_command = None;
                    self.write_error(&e);
                    continue;
                }
            };
            match flow {
                Flow::Stay => {}
                Flow::Resume => break,
                Flow::Quit => self.quit = true,
            }
        }
    }

    fn run_command(&mut self, command: Command, args: &str, tree: &MagicTree, data: &[u8]) -> Flow {
        debug!("debugger command {:?} {:?}", command, args);
        let outcome = match command {
            Command::Continue => return self.resume(StepMode::Running),
            Command::Step => return self.resume(StepMode::SingleStepping),
            Command::Next => return self.resume(StepMode::Next),
            Command::DebugAndContinue => {
                self.explain_until_break = true;
                return self.resume(StepMode::Running);
            }
            Command::DebugAndStep => {
                self.explain_next = true;
                return self.resume(StepMode::SingleStepping);
            }
            Command::Quit => return Flow::Quit,
            Command::DebugAndRerun => self.rerun_command(tree, data),
            Command::Where => self.where_command(tree, data),
            Command::Test => self.test_command(args, data),
            Command::Print => self.print_command(args, data),
            Command::Breakpoint => self.breakpoint_command(args),
            Command::Delete => self.delete_command(args),
            Command::Set => self.set_command(args),
            Command::Show => self.show_command(args),
            Command::Profile => {
                self.write_profile(tree);
                Ok(())
            }
            Command::Help => self.help_command(args),
        };
        if let Err(e) = outcome {
            self.write_error(&e);
        }
        Flow::Stay
    }

    fn resume(&mut self, mode: StepMode) -> Flow {
        self.step_mode = mode;
        Flow::Resume
    }

    fn explain(&mut self, tree: &MagicTree, id: TestId, data: &[u8], absolute_offset: u64) {
        let p = self.paint();
        if self.config.profile {
            self.write(&format!(
                "{} profiling is disabled for this test while it is explained\n",
                p.error("Warning:")
            ));
        }
        let _unprofiled = self.profilers.unprofiled();
        let node = &tree[id];
        self.write(&format!("{} {}\n", p.dim("Explaining"), node.definition_line()));
        let window = usize::try_from(absolute_offset).ok().and_then(|start| data.get(start..));
        let explanation = match window {
            Some(window) => node.pattern.explain(window),
            None => format!(
                "offset {} is past the end of the data ({} bytes)\n",
                absolute_offset,
                data.len()
            ),
        };
        self.write(&explanation);
    }

    fn rerun_command(&mut self, tree: &MagicTree, data: &[u8]) -> Result<(), CommandError> {
        let last = self.last.clone().ok_or(CommandError::NoTestYet)?;
        self.explain(tree, last.node, data, last.offset);
        Ok(())
    }

    fn where_command(&mut self, tree: &MagicTree, data: &[u8]) -> Result<(), CommandError> {
        let last = self.last.clone().ok_or(CommandError::NoTestYet)?;
        self.write_where(tree, data, &last);
        Ok(())
    }

    fn write_where(&mut self, tree: &MagicTree, data: &[u8], last: &LastTest) {
        let p = self.paint();
        let ctx = last.context(tree, data);
        let firing: Vec<String> = self
            .breakpoints
            .iter()
            .filter(|b| b.should_break(&ctx))
            .map(|b| format!("{}\n", p.magenta(&b.to_string())))
            .collect();
        if !firing.is_empty() {
            self.write(&firing.concat());
            self.write("\n");
        }

        let mut stack: Vec<TestId> = tree.ancestors(last.node).collect();
        stack.reverse();
        for id in stack {
            self.write_test(tree, id, false, self.timing(id));
        }
        self.write_test(tree, last.node, true, self.timing(last.node));
        // only the descendants that can still produce a MIME type
        let mut pending: Vec<TestId> = tree.children(last.node).into_iter().rev().collect();
        while let Some(id) = pending.pop() {
            if tree.can_produce_mime(id) {
                self.write_test(tree, id, false, self.timing(id));
                pending.extend(tree.children(id).into_iter().rev());
            }
        }
        self.write("\n");

        let offset = &tree[last.node].offset;
        if offset.is_relative() {
            match offset.to_absolute(last.parent_match.as_ref()) {
                Ok(absolute) => self.write(&format!(
                    "{}{}{}\n",
                    p.blue(&offset.to_string()),
                    p.dim(" = byte offset "),
                    p.bold(&absolute.to_string())
                )),
                Err(e) => self.write(&format!("{}\n", p.red(&e.to_string()))),
            }
        }
        let length = last.result.as_match().map_or(1, |m| m.length.max(1));
        self.write_context(data, last.offset, length);
        self.write_outcome(&last.result);
    }

    fn timing(&self, id: TestId) -> Option<f64> {
        if self.config.profile {
            self.profile_results.get(&ProfileKey::Test(id)).copied()
        } else {
            None
        }
    }

    fn write_test(&mut self, tree: &MagicTree, id: TestId, current: bool, timing: Option<f64>) {
        let p = self.paint();
        let node = &tree[id];
        let mut line = String::from(if current { "-> " } else { "   " });
        match &node.source {
            Some(source) => {
                line.push_str(&p.location(&format!("{}:{}", source.file_name(), source.line)))
            }
            None => line.push_str(&p.dim("?")),
        }
        line.push('\t');
        let definition = node.definition_line();
        line.push_str(&if current { p.bold(&definition) } else { definition });
        if let Some(ms) = timing {
            let _ = write!(line, "\t({})", format_ms(ms));
        }
        if let Some(mime) = node.mime() {
            let _ = write!(line, "\t{}", p.green(&format!("!:mime {}", mime)));
        }
        if !node.extensions().is_empty() {
            let exts: Vec<&str> = node.extensions().iter().map(String::as_str).collect();
            let _ = write!(line, "\t{}", p.green(&format!("!:ext {}", exts.join("/"))));
        }
        line.push('\n');
        self.write(&line);
    }

    /// Hex dump around `offset`, with `length` bytes from it highlighted.
    fn write_context(&mut self, data: &[u8], offset: u64, length: u64) {
        let p = self.paint();
        let len = data.len() as u64;
        if offset >= len {
            self.write(&format!(
                "{}\n",
                p.red(&format!("offset {} is past the end of the data ({} bytes)", offset, len))
            ));
            return;
        }
        let highlight = offset..offset.saturating_add(length).min(len);
        let first_row = offset.saturating_sub(CONTEXT_BYTES) / ROW_BYTES * ROW_BYTES;
        let end = highlight.end.saturating_add(CONTEXT_BYTES).min(len);

        let mut out = String::new();
        let mut row = first_row;
        while row < end {
            let row_end = (row + ROW_BYTES).min(end);
            let _ = write!(out, "{}  ", p.dim(&format!("{:08x}", row)));
            for i in row..row + ROW_BYTES {
                if i < row_end {
                    let hex = format!("{:02x}", data[i as usize]);
                    out.push_str(&if highlight.contains(&i) { p.highlight(&hex) } else { hex });
                    out.push(' ');
                } else {
                    out.push_str("   ");
                }
            }
            out.push(' ');
            for i in row..row_end {
                let byte = data[i as usize];
                let printable = byte.is_ascii_graphic() || byte == b' ';
                let shown = if printable { char::from(byte) } else { '.' }.to_string();
                out.push_str(&if highlight.contains(&i) { p.highlight(&shown) } else { shown });
            }
            out.push('\n');
            row += ROW_BYTES;
        }
        self.write(&out);
    }

    fn write_outcome(&mut self, result: &TestResult) {
        let p = self.paint();
        match result {
            TestResult::Matched(_) => self.write(&format!("{}\n", p.green("Test succeeded."))),
            TestResult::Failed { message, .. } => {
                self.write(&format!("{}\n{}\n", p.red("Test failed."), message));
            }
        }
    }

    fn write_usage(&mut self, usage: &str, arguments: &str, description: &str, example: &str) {
        let p = self.paint();
        self.write(&format!(
            "{} {}{}\n{}\n\nExample:\n{} {}\n",
            p.dim("Usage:"),
            p.command(usage),
            p.bold(arguments),
            description,
            p.command(usage),
            p.bold(example)
        ));
    }

    fn test_command(&mut self, args: &str, data: &[u8]) -> Result<(), CommandError> {
        if args.is_empty() {
            self.write_usage(
                "test",
                " DEFINITION LINE",
                "Attempt to run the given test at the current position.",
                "0 string \\x50\\x4b\\x05\\x06 ZIP EOCD record",
            );
            return Ok(());
        }
        let last = self.last.clone().ok_or(CommandError::NoTestYet)?;
        let (level, node) =
            ruleset::parse_test_line(args).map_err(|e| CommandError::BadArgument(e.to_string()))?;
        // a nested test resolves its offset against the current match
        let parent_match = if level == 0 { None } else { last.result.as_match().copied() };
        let offset = node
            .offset
            .to_absolute(parent_match.as_ref())
            .map_err(|e| CommandError::BadArgument(e.to_string()))?;

        let mut scratch = MagicTree::new();
        let id = scratch.add_root(node.with_source(SourceInfo {
            path: "STDIN".into(),
            line: 1,
            text: args.to_string(),
        }));
        let result =
            self.intercept(&scratch, id, data, offset, parent_match.as_ref(), Origin::Prompt);
        self.write_test(&scratch, id, true, None);
        self.write("\n");
        let length = result.as_match().map_or(1, |m| m.length.max(1));
        self.write_context(data, offset, length);
        self.write_outcome(&result);
        Ok(())
    }

    fn print_command(&mut self, args: &str, data: &[u8]) -> Result<(), CommandError> {
        if args.is_empty() {
            self.write_usage(
                "print",
                " OFFSET",
                "Calculate the absolute offset for the given definition offset.",
                "&0x26",
            );
            return Ok(());
        }
        let last = self.last.clone().ok_or(CommandError::NoTestYet)?;
        let offset = Offset::parse(args).map_err(|e| CommandError::BadArgument(e.to_string()))?;
        let absolute = offset
            .to_absolute(last.result.as_match())
            .map_err(|e| CommandError::BadArgument(e.to_string()))?;
        let p = self.paint();
        self.write(&format!("{}\n", p.bold(&absolute.to_string())));
        self.write_context(data, absolute, 1);
        Ok(())
    }

    fn breakpoint_command(&mut self, args: &str) -> Result<(), CommandError> {
        let p = self.paint();
        if !args.is_empty() {
            let parsed = Breakpoint::parse(args)
                .ok_or_else(|| CommandError::InvalidBreakpoint(args.to_string()))?;
            self.write(&format!("{}\n", p.magenta(&parsed.to_string())));
            self.breakpoints.push(parsed);
            return Ok(());
        }
        if !self.breakpoints.is_empty() {
            let listing: String = self
                .breakpoints
                .iter()
                .enumerate()
                .map(|(i, b)| {
                    format!("{}\t{}\n", p.dim(&format!("{}:", i)), p.magenta(&b.to_string()))
                })
                .collect();
            self.write(&listing);
            return Ok(());
        }
        let mut out = format!("{}\n", p.red("No breakpoints set."));
        for (usage, description, example) in breakpoint::USAGE {
            let _ = write!(
                out,
                "{}\n    {}\n    Example:\n    {}\n\n",
                p.bold(usage),
                description,
                p.magenta(example)
            );
        }
        let _ = write!(
            out,
            "By default, breakpoints will trigger whenever a matching test is run.\n\n\
             Prepend a breakpoint with {} to only trigger the breakpoint when the test fails.\n\
             For example:\n    {}\n\
             will only trigger if a test that could match a ZIP file failed.\n\n\
             Prepend a breakpoint with {} to only trigger the breakpoint when the test passes.\n\
             For example:\n    {}\n\
             will only trigger if the test on line 1337 of the archive definitions matched.\n",
            p.bold("!"),
            p.magenta("b !MIME:application/zip"),
            p.bold("="),
            p.magenta("b =archive:1337"),
        );
        self.write(&out);
        Ok(())
    }

    fn delete_command(&mut self, args: &str) -> Result<(), CommandError> {
        if args.is_empty() {
            self.write_usage(
                "delete",
                " BREAKPOINT",
                "Delete the breakpoint with the given number.",
                "0",
            );
            return Ok(());
        }
        let index = args
            .parse::<usize>()
            .ok()
            .filter(|&i| i < self.breakpoints.len())
            .ok_or_else(|| CommandError::InvalidBreakpointIndex(args.to_string()))?;
        let removed = self.breakpoints.remove(index);
        self.write(&format!("Deleted {}\n", removed));
        Ok(())
    }

    fn variable_mut(&mut self, name: &str) -> Result<&mut bool, CommandError> {
        match name {
            "break_on_parsing" => Ok(&mut self.config.break_on_parsing),
            "profile" => Ok(&mut self.config.profile),
            other => Err(CommandError::UnknownVariable(other.to_string())),
        }
    }

    fn variable(&self, name: &str) -> Result<bool, CommandError> {
        match name {
            "break_on_parsing" => Ok(self.config.break_on_parsing),
            "profile" => Ok(self.config.profile),
            other => Err(CommandError::UnknownVariable(other.to_string())),
        }
    }

    fn set_command(&mut self, args: &str) -> Result<(), CommandError> {
        let words: Vec<&str> = args.split_whitespace().collect();
        let (name, value) = match words.as_slice() {
            [name, value] | [name, "=", value] => (*name, *value),
            _ => {
                let p = self.paint();
                let mut out = format!(
                    "{} {}{}{}\n\n{}\n\n",
                    p.dim("Usage:"),
                    p.command("set"),
                    p.green(" VARIABLE "),
                    p.cyan("VALUE"),
                    p.bold("Options:")
                );
                for (name, description) in VARIABLES {
                    let _ = write!(
                        out,
                        "    {} {}\n    {}\n\n",
                        p.green(name),
                        p.dim(&format!("[{}|{}]", p.cyan("True"), p.cyan("False"))),
                        description
                    );
                }
                self.write(&out);
                return Ok(());
            }
        };
        self.variable(name)?;
        let parsed = parse_bool(value).ok_or_else(|| CommandError::InvalidValue {
            value: value.to_string(),
            expected: "True, False".to_string(),
        })?;
        *self.variable_mut(name)? = parsed;
        self.reinstall();
        Ok(())
    }

    fn show_command(&mut self, args: &str) -> Result<(), CommandError> {
        let p = self.paint();
        let words: Vec<&str> = args.split_whitespace().collect();
        let mut out = String::new();
        match words.as_slice() {
            [] => {
                for (i, (name, description)) in VARIABLES.iter().enumerate() {
                    if i > 0 {
                        out.push('\n');
                    }
                    let value = self.variable(name)?;
                    let _ = write!(out, "{}\n{}\n", show_variable(p, name, value), description);
                }
            }
            [name] => {
                let value = self.variable(name)?;
                let description = VARIABLES.iter().find(|(n, _)| n == name).map_or("", |(_, d)| d);
                let _ = write!(out, "{}\n{}\n", show_variable(p, name, value), description);
            }
            _ => {
                let _ = write!(
                    out,
                    "{} {}{}\n\n{}\n",
                    p.dim("Usage:"),
                    p.command("show"),
                    p.green(" VARIABLE"),
                    p.bold("Options:")
                );
                for (name, description) in VARIABLES {
                    let _ = write!(out, "\n    {}\n    {}\n", p.green(name), description);
                }
            }
        }
        self.write(&out);
        Ok(())
    }

    fn help_command(&mut self, args: &str) -> Result<(), CommandError> {
        let p = self.paint();
        let commands: Vec<&repl::CommandInfo> = if args.is_empty() {
            repl::COMMANDS.iter().collect()
        } else {
            vec![Command::resolve(args)?.info()]
        };
        let width = commands.iter().map(|info| info.name.len()).max().unwrap_or(0) + 3;
        let mut out = String::new();
        for info in commands {
            let _ = write!(
                out,
                "{} {} {}",
                p.command(info.name),
                p.dim(&".".repeat(width - info.name.len())),
                info.help
            );
            if !info.aliases.is_empty() {
                let aliases: Vec<String> = info.aliases.iter().map(|a| p.command(a)).collect();
                let _ = write!(out, " {}{}{}", p.dim("(aliases: "), aliases.join(", "), p.dim(")"));
            }
            out.push('\n');
        }
        self.write(&out);
        Ok(())
    }

    /// Prints every timing so far, slowest first.
    pub fn write_profile(&mut self, tree: &MagicTree) {
        let p = self.paint();
        if self.profile_results.is_empty() {
            if self.config.profile {
                self.write("No profiling data yet.\n");
            } else {
                self.write(&format!(
                    "{}\nEnable it by running `set profile True`.\n",
                    p.red("Profiling is disabled.")
                ));
            }
            return;
        }
        let mut table = TabWriter::new(Vec::new()).padding(2);
        for (key, ms) in self.profile_results() {
            let label = match &key {
                ProfileKey::Test(id) if id.index() < tree.len() => {
                    let node = &tree[*id];
                    match &node.source {
                        Some(source) => format!("test\t{}:{}", source.file_name(), source.line),
                        None => format!("test\t{}{}", ">".repeat(node.level()), node.offset),
                    }
                }
                ProfileKey::Test(id) => format!("test\t#{}", id.index()),
                ProfileKey::Parser(name) => format!("parser\t{}", name),
            };
            let _ = writeln!(table, "{}\t{}", label, format_ms(ms));
        }
        let rendered = match table.into_inner() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("could not lay out the profile table: {}", e);
                return;
            }
        };
        self.write(&format!("{}\n{}", p.bold("Profile Results:"), rendered));
    }

    fn write_match(&mut self, parser: &str, m: &Match) {
        let p = self.paint();
        self.write(&format!(
            "{}\n  {}: {},\n  {}: {},\n{}\n{} About to parse for submatches using {}.\n",
            p.bold("{"),
            p.blue("\"offset\""),
            m.offset,
            p.blue("\"length\""),
            m.length,
            p.bold("}"),
            p.location(&format!("@{}", m.offset)),
            parser
        ));
    }
}

impl TestEvaluator for Debugger {
    fn evaluate(
        &mut self,
        tree: &MagicTree,
        id: TestId,
        data: &[u8],
        absolute_offset: u64,
        parent_match: Option<&Match>,
    ) -> TestResult {
        self.intercept(tree, id, data, absolute_offset, parent_match, Origin::Walker)
    }

    fn should_stop(&self) -> bool {
        self.quit
    }
}

impl ParseObserver for Debugger {
    fn parse_started(&mut self, parser: &str, _data: &[u8], m: &Match) {
        if self.quit || !self.instrumentation.intercepts_parsers() {
            return;
        }
        let mut run = ParserRun::default();
        if self.config.break_on_parsing {
            let _unprofiled = self.profilers.unprofiled();
            let p = self.paint();
            self.write_match(parser, m);
            let question = format!(
                "Step through its output? {}",
                p.dim("(disable this prompt with `set break_on_parsing False`)")
            );
            match repl::confirm(&mut *self.console, p, &question, false) {
                Some(stepping) => run.stepping = stepping,
                None => self.quit = true,
            }
        }
        if self.config.profile {
            let profiler = Profiler::new();
            self.profilers.enter(&profiler);
            run.profiler = Some(profiler);
        }
        self.parser_run = Some(run);
    }

    fn submatch(&mut self, _parser: &str, submatch: &Submatch) {
        let run = self.parser_run.as_ref().map(|r| (r.stepping, r.print_remaining));
        let Some((stepping, print_remaining)) = run else {
            return;
        };
        if !stepping && !print_remaining {
            return;
        }
        let _unprofiled = self.profilers.unprofiled();
        let p = self.paint();
        if stepping {
            self.write(&p.dim("Got a submatch:\n"));
        }
        self.write(&format!("{}\n", submatch));
        if !stepping {
            return;
        }
        let mut keep_stepping = false;
        let mut print = false;
        let console = &mut *self.console;
        match repl::confirm(console, p, "Continue stepping through the next submatch?", true) {
            Some(true) => keep_stepping = true,
            Some(false) => {
                match repl::confirm(console, p, "Print the remaining submatches?", false) {
                    Some(answer) => print = answer,
                    None => self.quit = true,
                }
            }
            None => self.quit = true,
        }
        if let Some(run) = self.parser_run.as_mut() {
            run.stepping = keep_stepping;
            run.print_remaining = print;
        }
    }

    fn parse_finished(&mut self, parser: &str, m: &Match) {
        let Some(run) = self.parser_run.take() else {
            return;
        };
        if run.stepping {
            self.write(&format!(
                "Yielded all submatches from {} at offset {}.\n",
                parser, m.offset
            ));
        }
        if let Some(profiler) = run.profiler {
            if let Err(e) = self.profilers.exit(&profiler) {
                warn!("profiling parser {}: {}", parser, e);
            }
            self.record(ProfileKey::Parser(parser.to_string()), &profiler);
        }
    }
}

/// Keeps a [`Debugger`] entered while alive.
pub struct DebugSession<'d> {
    debugger: &'d mut Debugger,
}

impl Deref for DebugSession<'_> {
    type Target = Debugger;

    fn deref(&self) -> &Debugger {
        self.debugger
    }
}

impl DerefMut for DebugSession<'_> {
    fn deref_mut(&mut self) -> &mut Debugger {
        self.debugger
    }
}

impl Drop for DebugSession<'_> {
    fn drop(&mut self) {
        self.debugger.exit();
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn show_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn show_variable(p: Painter, name: &str, value: bool) -> String {
    format!("{}{}{}", p.green(name), p.dim(" = "), p.cyan(show_bool(value)))
}

fn format_ms(ms: f64) -> String {
    if ms >= 1.0 {
        format!("{}ms", ms.round())
    } else {
        format!("{:.2}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> MagicTree {
        ruleset::from_str(
            "0 string AB root\n>&0 byte 0x43 child\n!:mime a/b\n0 string XY other\n!:mime x/y\n",
            "inline",
        )
        .unwrap()
    }

    fn debugger(lines: &[&str]) -> (Debugger, ScriptedConsole) {
        let console = ScriptedConsole::new(lines.iter().copied());
        (Debugger::with_console(DebuggerConfig::default(), console.clone()), console)
    }

    #[test]
    fn idle_debugger_is_transparent() {
        let tree = tree();
        let (mut debugger, console) = debugger(&[]);
        debugger.set_step_mode(StepMode::SingleStepping);
        let matches: Vec<TestId> = tree.match_with(b"ABC", &mut debugger).map(|m| m.node).collect();
        assert_eq!(matches.len(), 1);
        assert!(debugger.last_test().is_none());
        assert_eq!(console.transcript(), "");
    }

    #[test]
    fn only_intercepted_kinds_stop() {
        let tree = tree();
        let (mut debugger, console) = debugger(&["continue"]);
        debugger.set_intercepted_kinds([TestKind::Integer]);
        debugger.set_step_mode(StepMode::SingleStepping);
        {
            let mut session = debugger.session();
            let kinds: Vec<TestKind> = session.instrumentation().kinds().collect();
            assert_eq!(kinds, vec![TestKind::Integer]);
            let _ = tree.match_with(b"ABC", &mut *session).count();
        }
        // the strings ran unobserved, so the byte child was the only stop
        assert_eq!(console.remaining(), 0);
        assert_eq!(console.transcript().matches("-> inline:").count(), 1);
        assert!(console.transcript().contains("-> inline:2\t>&0\tbyte\t"));
        assert_eq!(debugger.last_test(), Some(tree.children(tree.roots()[0])[0]));
    }

    #[test]
    fn enter_and_exit_are_counted() {
        let (mut debugger, _console) = debugger(&[]);
        debugger.enter();
        debugger.enter();
        debugger.exit();
        assert!(debugger.instrumentation().is_installed());
        debugger.exit();
        assert!(!debugger.instrumentation().is_installed());
        {
            let session = debugger.session();
            assert!(session.is_entered());
        }
        assert!(!debugger.is_entered());
    }

    #[test]
    #[should_panic]
    fn unbalanced_exit_panics() {
        let (mut debugger, _console) = debugger(&[]);
        debugger.exit();
    }

    #[test]
    fn single_stepping_prompts_at_every_test() {
        let tree = tree();
        let (mut debugger, console) = debugger(&["step", "step", "continue"]);
        debugger.set_step_mode(StepMode::SingleStepping);
        let count = {
            let mut session = debugger.session();
            tree.match_with(b"ABC", &mut *session).count()
        };
        assert_eq!(count, 1);
        assert_eq!(console.remaining(), 0);
        assert_eq!(console.transcript().matches(PROMPT).count(), 3);
    }

    #[test]
    fn next_stops_only_after_a_match() {
        let tree = tree();
        // root matches, child matches, other fails
        let (mut debugger, console) = debugger(&["next", "next", "next"]);
        debugger.set_step_mode(StepMode::Next);
        let mut session = debugger.session();
        let _ = tree.match_with(b"ABC", &mut *session).count();
        assert_eq!(console.remaining(), 1);
    }

    #[test]
    fn quit_stops_the_walk() {
        let tree = tree();
        let (mut debugger, _console) = debugger(&["quit"]);
        debugger.set_step_mode(StepMode::SingleStepping);
        let mut session = debugger.session();
        assert_eq!(tree.match_with(b"ABC", &mut *session).count(), 0);
        assert!(session.has_quit());
    }

    #[test]
    fn prompt_tests_leave_history_alone() {
        let tree = tree();
        let (mut debugger, console) = debugger(&["test 0 string AB", "test >&0 byte 0x43", "quit"]);
        debugger.set_step_mode(StepMode::SingleStepping);
        let mut session = debugger.session();
        let _ = tree.match_with(b"ABC", &mut *session).count();
        assert_eq!(session.last_test(), Some(tree.roots()[0]));
        assert_eq!(console.transcript().matches("Test succeeded.").count(), 3);
    }

    #[test]
    fn parse_bool_forms() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn ms_formatting() {
        assert_eq!(format_ms(12.4), "12ms");
        assert_eq!(format_ms(0.123), "0.12ms");
    }
}
