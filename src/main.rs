//! `tmagic`: identifies files from their contents, optionally under the
//! interactive debugger.

use std::error::Error;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{debug, warn};
use tabwriter::TabWriter;
use walkdir::WalkDir;

use magic_tree::basetype;
use magic_tree::{
    Debugger, DebuggerConfig, Direct, MagicTree, Match, Observed, ParseObserver, ParserRegistry,
    Submatch, TestEvaluator, TestId, BUILTIN,
};

#[derive(Parser, Debug)]
#[command(
    name = "tmagic",
    version,
    about = "Determines the MIME type of files from their contents"
)]
struct Args {
    /// Files to identify
    #[arg(required = true, value_name = "FILES")]
    files: Vec<PathBuf>,

    /// Definition file to use instead of the bundled definitions; may be repeated
    #[arg(short, long = "magic", value_name = "FILE")]
    magic: Vec<PathBuf>,

    /// Run every file under the interactive debugger
    #[arg(long)]
    debug: bool,

    /// Do not break when a structural parser is about to run
    #[arg(long)]
    no_debug_parsers: bool,

    /// Time every test and parser, and print the results at exit
    #[arg(long)]
    profile: bool,

    /// Only run the tests that can produce this MIME type; may be repeated
    #[arg(long, value_name = "MIME")]
    only_mime: Vec<String>,

    /// Only run the tests that can produce this extension; may be repeated
    #[arg(long, value_name = "EXT")]
    only_ext: Vec<String>,

    /// Descend into directories
    #[arg(short, long)]
    recursive: bool,

    /// Print every match and submatch instead of only the most specific type
    #[arg(long)]
    all: bool,
}

/// What matching one buffer produced.
struct Report {
    matches: Vec<Match>,
    submatches: Vec<Submatch>,
}

fn identify<E>(
    tree: &MagicTree,
    roots: &[TestId],
    data: &[u8],
    parsers: &ParserRegistry,
    evaluator: &mut E,
    parse: bool,
) -> Report
where
    E: TestEvaluator + ParseObserver,
{
    let matches: Vec<Match> = tree.match_roots(roots, data, &mut *evaluator).collect();
    let mut submatches = Vec::new();
    if parse {
        for m in &matches {
            let Some(mime) = tree[m.node].mime() else { continue };
            for parser in parsers.parsers_for(mime) {
                submatches.extend(Observed::new(parser.as_ref(), data, m, &mut *evaluator));
                if evaluator.should_stop() {
                    return Report { matches, submatches };
                }
            }
        }
    }
    Report { matches, submatches }
}

fn load_definitions(paths: &[PathBuf]) -> Result<MagicTree, Box<dyn Error>> {
    let mut tree = MagicTree::new();
    for path in paths {
        let added = tree.load_file(path)?;
        debug!("{}: {} root tests", path.display(), added.len());
    }
    Ok(tree)
}

fn collect_files(args: &Args) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in &args.files {
        if !path.is_dir() {
            files.push(path.clone());
        } else if args.recursive {
            for entry in WalkDir::new(path).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                    Ok(_) => {}
                    Err(e) => warn!("{}", e),
                }
            }
        } else {
            warn!("{} is a directory; use --recursive to descend into it", path.display());
        }
    }
    files
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let loaded;
    let tree: &MagicTree = if args.magic.is_empty() {
        &BUILTIN
    } else {
        loaded = load_definitions(&args.magic)?;
        &loaded
    };
    let roots = if args.only_mime.is_empty() && args.only_ext.is_empty() {
        tree.roots().to_vec()
    } else {
        let mimes: Vec<&str> = args.only_mime.iter().map(String::as_str).collect();
        let exts: Vec<&str> = args.only_ext.iter().map(String::as_str).collect();
        tree.only_match(&mimes, &exts)
    };
    let parsers = ParserRegistry::with_builtin();

    let config = DebuggerConfig {
        break_on_parsing: args.debug && !args.no_debug_parsers,
        profile: args.profile,
        color: io::stdout().is_terminal(),
    };
    let mut debugger = Debugger::new(config);
    let mut session = (args.debug || args.profile).then(|| debugger.session());
    let mut prompted = false;

    let mut out = TabWriter::new(io::stdout());
    for path in collect_files(args) {
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                continue;
            }
        };
        let report = match session.as_mut() {
            Some(session) => {
                if args.debug && !prompted {
                    prompted = true;
                    session.write_banner();
                    session.repl(tree, &data);
                    if session.has_quit() {
                        out.flush()?;
                        process::exit(0);
                    }
                }
                session.reset();
                identify(tree, &roots, &data, &parsers, &mut **session, args.all || args.debug)
            }
            None => identify(tree, &roots, &data, &parsers, &mut Direct, args.all),
        };

        if args.all {
            for m in &report.matches {
                let node = &tree[m.node];
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}",
                    path.display(),
                    m.offset,
                    node.mime().unwrap_or_default(),
                    node.message
                )?;
            }
            for submatch in &report.submatches {
                writeln!(out, "{}\t{}\t\t{}", path.display(), submatch.offset, submatch)?;
            }
        } else {
            let mime = report
                .matches
                .last()
                .and_then(|m| tree[m.node].mime())
                .unwrap_or_else(|| basetype::check::fallback(&data));
            writeln!(out, "{}\t{}", path.display(), mime)?;
        }
        if session.is_some() {
            out.flush()?;
        }
        if session.as_ref().map_or(false, |s| s.has_quit()) {
            out.flush()?;
            process::exit(0);
        }
    }
    out.flush()?;

    if let Some(session) = session.as_mut() {
        if args.profile {
            session.write_profile(tree);
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("tmagic: {}", e);
        process::exit(1);
    }
}
