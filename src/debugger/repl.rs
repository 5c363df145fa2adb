//! Console I/O and the command table of the debugger prompt.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use colored::Colorize;
use log::warn;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::error::CommandError;

/// Where the debugger reads commands and writes everything else.
pub trait Console {
    /// Reads one line without its terminator. `None` means end of input.
    fn read_line(&mut self, prompt: &str) -> Option<String>;

    fn write(&mut self, text: &str);
}

/// The interactive terminal, with line editing when it is available.
pub struct Terminal {
    editor: Option<DefaultEditor>,
}

impl Terminal {
    pub fn new() -> Terminal {
        let editor = match DefaultEditor::new() {
            Ok(editor) => Some(editor),
            Err(e) => {
                warn!("line editing is unavailable: {}", e);
                None
            }
        };
        Terminal { editor }
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Terminal::new()
    }
}

impl Console for Terminal {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        let Some(editor) = self.editor.as_mut() else {
            print!("{}", prompt);
            let _ = io::stdout().flush();
            let mut line = String::new();
            return match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            };
        };
        loop {
            match editor.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    return Some(line);
                }
                Err(ReadlineError::Interrupted) => println!("^C"),
                Err(ReadlineError::Eof) => return None,
                Err(e) => {
                    warn!("could not read from the terminal: {}", e);
                    return None;
                }
            }
        }
    }

    fn write(&mut self, text: &str) {
        print!("{}", text);
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Default)]
struct Script {
    input: VecDeque<String>,
    transcript: String,
}

/// Feeds prepared lines to the debugger and records what it prints.
///
/// Clones share the same script, so a caller can keep one handle to inspect
/// the transcript after handing the other to a [`Debugger`](super::Debugger).
#[derive(Debug, Clone, Default)]
pub struct ScriptedConsole {
    script: Rc<RefCell<Script>>,
}

impl ScriptedConsole {
    pub fn new<I, S>(lines: I) -> ScriptedConsole
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let console = ScriptedConsole::default();
        for line in lines {
            console.push_line(line);
        }
        console
    }

    pub fn push_line(&self, line: impl Into<String>) {
        self.script.borrow_mut().input.push_back(line.into());
    }

    /// Lines not yet read.
    pub fn remaining(&self) -> usize {
        self.script.borrow().input.len()
    }

    /// Everything written so far, prompts and echoed input included.
    pub fn transcript(&self) -> String {
        self.script.borrow().transcript.clone()
    }

    pub fn take_transcript(&self) -> String {
        std::mem::take(&mut self.script.borrow_mut().transcript)
    }
}

impl Console for ScriptedConsole {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        let mut script = self.script.borrow_mut();
        let line = script.input.pop_front()?;
        script.transcript.push_str(prompt);
        script.transcript.push_str(&line);
        script.transcript.push('\n');
        Some(line)
    }

    fn write(&mut self, text: &str) {
        self.script.borrow_mut().transcript.push_str(text);
    }
}

/// Asks a yes/no question until it gets an answer. An empty answer picks `default`.
pub fn confirm(
    console: &mut dyn Console,
    paint: Painter,
    message: &str,
    default: bool,
) -> Option<bool> {
    let choices = if default {
        format!("[{}{}]", paint.bold("Y"), paint.dim("n"))
    } else {
        format!("[{}{}]", paint.dim("y"), paint.bold("N"))
    };
    let prompt = format!("{} {} ", paint.bold(message), choices);
    loop {
        let answer = console.read_line(&prompt)?;
        match answer.trim().to_ascii_lowercase().as_str() {
            "" => return Some(default),
            "y" | "yes" => return Some(true),
            "n" | "no" => return Some(false),
            _ => {}
        }
    }
}

/// Applies terminal styles, or leaves text alone when colour is off.
#[derive(Debug, Clone, Copy)]
pub struct Painter {
    pub enabled: bool,
}

macro_rules! styles {
    ($($name:ident => $($style:ident).+;)*) => {
        impl Painter {
            $(
                pub fn $name(self, text: &str) -> String {
                    if self.enabled {
                        text.$($style()).+.to_string()
                    } else {
                        text.to_string()
                    }
                }
            )*
        }
    };
}

styles! {
    bold => bold;
    dim => dimmed;
    red => red;
    error => red.bold;
    green => green;
    blue => blue;
    command => blue.bold;
    magenta => magenta;
    cyan => cyan;
    location => cyan.dimmed;
    highlight => yellow.bold;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Continue,
    Step,
    Next,
    DebugAndRerun,
    DebugAndContinue,
    DebugAndStep,
    Where,
    Test,
    Print,
    Breakpoint,
    Delete,
    Set,
    Show,
    Profile,
    Help,
    Quit,
}

pub struct CommandInfo {
    pub command: Command,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Prefixes of this command's name and aliases win over other commands'.
    pub abbreviable: bool,
    pub help: &'static str,
}

pub const COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        command: Command::Continue,
        name: "continue",
        aliases: &["run"],
        abbreviable: true,
        help: "continue execution until the next breakpoint is hit",
    },
    CommandInfo {
        command: Command::Step,
        name: "step",
        aliases: &[],
        abbreviable: true,
        help: "step through a single magic test",
    },
    CommandInfo {
        command: Command::Next,
        name: "next",
        aliases: &[],
        abbreviable: true,
        help: "continue execution until the next test that matches",
    },
    CommandInfo {
        command: Command::DebugAndRerun,
        name: "debug_and_rerun",
        aliases: &[],
        abbreviable: false,
        help: "re-run the last test and explain how it was evaluated",
    },
    CommandInfo {
        command: Command::DebugAndContinue,
        name: "debug_and_continue",
        aliases: &["debug", "debug_and_cont"],
        abbreviable: false,
        help: "continue, explaining every test until the next break",
    },
    CommandInfo {
        command: Command::DebugAndStep,
        name: "debug_and_step",
        aliases: &[],
        abbreviable: false,
        help: "step into the next magic test and explain it",
    },
    CommandInfo {
        command: Command::Where,
        name: "where",
        aliases: &["info stack", "backtrace"],
        abbreviable: true,
        help: "print the context of the current magic test",
    },
    CommandInfo {
        command: Command::Test,
        name: "test",
        aliases: &[],
        abbreviable: true,
        help: "test the following definition line at the current position",
    },
    CommandInfo {
        command: Command::Print,
        name: "print",
        aliases: &[],
        abbreviable: true,
        help: "print the computed absolute offset of the following definition offset",
    },
    CommandInfo {
        command: Command::Breakpoint,
        name: "breakpoint",
        aliases: &[],
        abbreviable: true,
        help: "list the current breakpoints or add a new one",
    },
    CommandInfo {
        command: Command::Delete,
        name: "delete",
        aliases: &[],
        abbreviable: true,
        help: "delete a breakpoint",
    },
    CommandInfo {
        command: Command::Set,
        name: "set",
        aliases: &[],
        abbreviable: false,
        help: "modifies part of the debugger environment",
    },
    CommandInfo {
        command: Command::Show,
        name: "show",
        aliases: &[],
        abbreviable: false,
        help: "prints part of the debugger environment",
    },
    CommandInfo {
        command: Command::Profile,
        name: "profile",
        aliases: &[],
        abbreviable: false,
        help: "print current profiling results (to enable profiling, use `set profile True`)",
    },
    CommandInfo {
        command: Command::Help,
        name: "help",
        aliases: &["?"],
        abbreviable: true,
        help: "print this message",
    },
    CommandInfo {
        command: Command::Quit,
        name: "quit",
        aliases: &["exit"],
        abbreviable: true,
        help: "exit the debugger",
    },
];

impl Command {
    pub fn info(self) -> &'static CommandInfo {
        COMMANDS
            .iter()
            .find(|info| info.command == self)
            .unwrap_or(&COMMANDS[0])
    }

    /// Resolves a command word.
    ///
    /// Exact names and aliases win. Otherwise the word is tried as a prefix of,
    /// in turn, the names of abbreviable commands, their aliases, and finally
    /// every name and alias. The first tier with any candidate decides; more
    /// than one distinct command there is ambiguous.
    pub fn resolve(word: &str) -> Result<Command, CommandError> {
        if let Some(info) = COMMANDS
            .iter()
            .find(|info| info.name == word || info.aliases.contains(&word))
        {
            return Ok(info.command);
        }
        if word.is_empty() {
            return Err(CommandError::UnknownCommand(String::new()));
        }
        let tiers: [&dyn Fn(&CommandInfo) -> bool; 3] = [
            &|info: &CommandInfo| info.abbreviable && info.name.starts_with(word),
            &|info: &CommandInfo| info.abbreviable && alias_prefixed(info, word),
            &|info: &CommandInfo| info.name.starts_with(word) || alias_prefixed(info, word),
        ];
        for in_tier in tiers.iter() {
            let candidates: Vec<&CommandInfo> =
                COMMANDS.iter().filter(|info| in_tier(*info)).collect();
            match candidates.as_slice() {
                [] => continue,
                [only] => return Ok(only.command),
                many => {
                    return Err(CommandError::AmbiguousCommand {
                        input: word.to_string(),
                        candidates: many.iter().map(|info| info.name.to_string()).collect(),
                    })
                }
            }
        }
        Err(CommandError::UnknownCommand(word.to_string()))
    }
}

fn alias_prefixed(info: &CommandInfo, word: &str) -> bool {
    info.aliases.iter().any(|alias| alias.starts_with(word))
}

/// Splits an input line into its command and the rest of the line.
pub fn parse_command(line: &str) -> Result<(Command, &str), CommandError> {
    let line = line.trim();
    // multi-word aliases
    for info in COMMANDS {
        for alias in info.aliases.iter().filter(|a| a.contains(' ')) {
            if let Some(rest) = line.strip_prefix(*alias) {
                if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                    return Ok((info.command, rest.trim()));
                }
            }
        }
    }
    let (word, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    Ok((Command::resolve(word)?, args.trim()))
}
