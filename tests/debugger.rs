mod debugger {

    extern crate magic_tree;

    use magic_tree::debugger::{ProfileKey, ScriptedConsole};
    use magic_tree::magic::ruleset;
    use magic_tree::parser::PngChunks;
    use magic_tree::{
        Breakpoint, Debugger, DebuggerConfig, MagicTree, Match, Observed, StepMode, Submatch,
        BUILTIN,
    };

    const ARCHIVES: &str = "0 string PK\\003\\004 zip\n>4 byte x\n\
                            !:mime application/zip\n!:ext zip\n\
                            0 string %PDF- pdf\n!:mime application/pdf\n";

    fn archives() -> MagicTree {
        ruleset::from_str(ARCHIVES, "magic/archive").unwrap()
    }

    fn abc() -> MagicTree {
        ruleset::from_str(
            "0 string AB root\n>&0 byte 0x43 child\n!:mime a/b\n0 string XY other\n!:mime x/y\n",
            "inline",
        )
        .unwrap()
    }

    fn scripted(config: DebuggerConfig, lines: &[&str]) -> (Debugger, ScriptedConsole) {
        let console = ScriptedConsole::new(lines.iter().copied());
        (Debugger::with_console(config, console.clone()), console)
    }

    fn png() -> Vec<u8> {
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]);
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"IEND");
        data.extend_from_slice(&[0; 4]);
        data
    }

    fn png_match(data: &[u8]) -> Match {
        BUILTIN
            .match_all(data)
            .find(|m| BUILTIN[m.node].mime() == Some("image/png"))
            .unwrap()
    }

    #[test]
    fn mime_breakpoint_stops_where_the_type_can_match() {
        let tree = archives();
        let (mut debugger, console) =
            scripted(DebuggerConfig::default(), &["where", "continue", "continue"]);
        debugger.add_breakpoint(Breakpoint::parse("mime:application/zip").unwrap());
        let found: Vec<Match> = {
            let mut session = debugger.session();
            tree.match_with(b"PK\x03\x04\x14\x00", &mut *session).collect()
        };
        assert_eq!(found.len(), 1);
        assert_eq!(console.remaining(), 0);
        assert!(!debugger.has_quit());
        let transcript = console.transcript();
        // the zip root, `where`, then the typed child; never the pdf test
        assert_eq!(transcript.matches("Breakpoint: Matching for MIME application/zip").count(), 3);
        assert!(transcript.contains("-> archive:1\t0\tstring\t"));
        assert!(transcript.contains("-> archive:2\t>4\tbyte\t"));
        assert!(!transcript.contains("archive:5"));
    }

    #[test]
    fn success_only_wildcard_breakpoint() {
        let tree = archives();
        let (mut debugger, console) = scripted(DebuggerConfig::default(), &["c", "c"]);
        debugger.add_breakpoint(Breakpoint::parse("=MIME:application/*").unwrap());
        let mut session = debugger.session();
        let _ = tree.match_with(b"%PDF-1.7", &mut *session).count();
        // the zip test failed, so only the pdf test stopped
        assert_eq!(console.remaining(), 1);
        let transcript = console.transcript();
        assert!(transcript.contains("[MATCHED] Breakpoint: Matching for MIME application/*"));
        assert_eq!(session.last_result().map(|r| r.is_match()), Some(true));
    }

    #[test]
    fn source_breakpoint_on_failure() {
        let tree = archives();
        let (mut debugger, console) = scripted(DebuggerConfig::default(), &["continue"]);
        debugger.add_breakpoint(Breakpoint::parse("!archive:5").unwrap());
        let mut session = debugger.session();
        let _ = tree.match_with(b"PK\x03\x04", &mut *session).count();
        assert_eq!(console.remaining(), 0);
        let transcript = console.transcript();
        assert!(transcript.contains("[FAILED] Breakpoint: archive line 5"));
        assert!(transcript.contains("Test failed."));
    }

    #[test]
    fn abbreviations_and_repeats() {
        let tree = abc();
        let (mut debugger, console) = scripted(DebuggerConfig::default(), &["s", "", "c"]);
        debugger.set_step_mode(StepMode::SingleStepping);
        let mut session = debugger.session();
        let _ = tree.match_with(b"ABC", &mut *session).count();
        assert_eq!(console.remaining(), 0);
        assert_eq!(session.step_mode(), StepMode::Running);
        assert!(!session.has_quit());
    }

    #[test]
    fn running_out_of_input_quits() {
        let tree = abc();
        let (mut debugger, _console) = scripted(DebuggerConfig::default(), &[]);
        debugger.set_step_mode(StepMode::SingleStepping);
        let mut session = debugger.session();
        assert_eq!(tree.match_with(b"ABC", &mut *session).count(), 0);
        assert!(session.has_quit());
    }

    #[test]
    fn commands_before_the_first_test() {
        let tree = abc();
        let (mut debugger, console) =
            scripted(DebuggerConfig::default(), &["where", "frobnicate", "help n", "exit"]);
        debugger.repl(&tree, b"ABC");
        assert!(debugger.has_quit());
        let transcript = console.transcript();
        assert!(transcript.contains("The first test has not yet been run."));
        assert!(transcript.contains("Undefined command: \"frobnicate\". Try \"help\"."));
        assert!(transcript.contains("continue execution until the next test that matches"));
    }

    #[test]
    fn rerun_explains_the_last_test() {
        let tree = abc();
        let (mut debugger, console) =
            scripted(DebuggerConfig::default(), &["debug_and_rerun", "quit"]);
        debugger.set_step_mode(StepMode::SingleStepping);
        {
            let mut session = debugger.session();
            let _ = tree.match_with(b"ABC", &mut *session).count();
        }
        assert_eq!(console.remaining(), 0);
        assert!(debugger.has_quit());
        let transcript = console.transcript();
        assert!(transcript.contains("Explaining 0\tstring\tAB\troot\n"));
        assert!(transcript.contains("data begins ABC\n"));
        assert!(transcript.contains("matched, consuming 2 byte(s)"));
        assert!(!transcript.contains("profiling is disabled"));
    }

    #[test]
    fn rerun_before_the_first_test() {
        let tree = abc();
        let (mut debugger, console) =
            scripted(DebuggerConfig::default(), &["debug_and_rerun", "quit"]);
        debugger.repl(&tree, b"ABC");
        let transcript = console.transcript();
        assert!(transcript.contains("The first test has not yet been run."));
        assert!(!transcript.contains("Explaining"));
    }

    #[test]
    fn debug_and_step_explains_only_the_next_test() {
        let tree = abc();
        let (mut debugger, console) =
            scripted(DebuggerConfig::default(), &["debug_and_s", "continue"]);
        debugger.set_step_mode(StepMode::SingleStepping);
        {
            let mut session = debugger.session();
            let _ = tree.match_with(b"ABC", &mut *session).count();
        }
        assert_eq!(console.remaining(), 0);
        let transcript = console.transcript();
        assert_eq!(transcript.matches("Explaining").count(), 1);
        assert!(transcript.contains("Explaining >&0\tbyte\t"));
        assert!(transcript.contains("matched, consuming 1 byte(s)"));
        assert_eq!(debugger.step_mode(), StepMode::Running);
        assert!(!debugger.has_quit());
    }

    #[test]
    fn debug_and_continue_explains_until_the_end_without_profiling() {
        let tree = abc();
        let config = DebuggerConfig { break_on_parsing: false, profile: true, color: false };
        let (mut debugger, console) = scripted(config, &["debug"]);
        debugger.set_step_mode(StepMode::SingleStepping);
        {
            let mut session = debugger.session();
            let _ = tree.match_with(b"ABC", &mut *session).count();
        }
        assert_eq!(console.remaining(), 0);
        let transcript = console.transcript();
        assert_eq!(
            transcript
                .matches("Warning: profiling is disabled for this test while it is explained\n")
                .count(),
            2
        );
        assert!(transcript.contains("Explaining >&0\tbyte\t"));
        assert!(transcript.contains("Explaining 0\tstring\tXY\tother\n"));
        assert!(transcript.contains("no match"));
        assert!(!transcript.contains("Explaining 0\tstring\tAB"));

        // only the root ran before explaining began
        let results = debugger.profile_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, ProfileKey::Test(tree.roots()[0]));
    }

    #[test]
    fn help_lists_every_command() {
        let tree = abc();
        let (mut debugger, console) = scripted(DebuggerConfig::default(), &["?", "quit"]);
        debugger.repl(&tree, b"");
        let transcript = console.transcript();
        for name in ["continue", "debug_and_rerun", "where", "breakpoint", "profile", "quit"] {
            assert!(transcript.contains(name), "{} missing from help", name);
        }
        assert!(transcript.contains("(aliases: info stack, backtrace)"));
    }

    #[test]
    fn set_and_show() {
        let tree = abc();
        let (mut debugger, console) = scripted(
            DebuggerConfig::default(),
            &[
                "set profile = on",
                "show profile",
                "set bogus 1",
                "set break_on_parsing maybe",
                "show",
                "quit",
            ],
        );
        debugger.repl(&tree, b"ABC");
        assert!(debugger.config().profile);
        assert!(debugger.config().break_on_parsing);
        let transcript = console.transcript();
        assert!(transcript.contains("profile = True\nProfile the performance"));
        assert!(transcript.contains("Unknown variable bogus"));
        assert!(transcript.contains("Invalid value \"maybe\"; must be one of True, False"));
        assert!(transcript.contains("break_on_parsing = True\n"));
    }

    #[test]
    fn breakpoint_listing_and_deletion() {
        let tree = abc();
        let (mut debugger, console) = scripted(
            DebuggerConfig::default(),
            &[
                "b",
                "b mime:image/*",
                "break ext:zip",
                "b",
                "delete 0",
                "delete 7",
                "b nonsense",
                "quit",
            ],
        );
        debugger.repl(&tree, b"");
        assert_eq!(debugger.breakpoints().len(), 1);
        assert_eq!(debugger.breakpoints()[0].to_string(), "Breakpoint: Matching for extension zip");
        let transcript = console.transcript();
        assert!(transcript.contains("No breakpoints set."));
        assert!(transcript.contains(
            "0:\tBreakpoint: Matching for MIME image/*\n\
             1:\tBreakpoint: Matching for extension zip\n"
        ));
        assert!(transcript.contains("Deleted Breakpoint: Matching for MIME image/*"));
        assert!(transcript.contains("Invalid breakpoint \"7\""));
        assert!(transcript.contains("Invalid breakpoint pattern \"nonsense\""));
    }

    #[test]
    fn print_and_test_at_a_stop() {
        let tree = abc();
        let (mut debugger, console) = scripted(
            DebuggerConfig::default(),
            &["print &1", "test 0 string XY", "test 0 frob 1", "quit"],
        );
        debugger.set_step_mode(StepMode::SingleStepping);
        let mut session = debugger.session();
        let _ = tree.match_with(b"ABCD", &mut *session).count();
        let transcript = console.transcript();
        // the root matched 2 bytes, so &1 is one past its end
        assert!(transcript.contains("(tmagic) print &1\n3\n"));
        assert!(transcript.contains("-> STDIN:1\t0\tstring\tXY"));
        assert!(transcript.contains("Test failed."));
        assert!(transcript.contains("unknown data type \"frob\""));
        assert_eq!(session.last_test(), Some(tree.roots()[0]));
    }

    #[test]
    fn profiling_records_every_test() {
        let tree = abc();
        let config = DebuggerConfig { break_on_parsing: false, profile: true, color: false };
        let (mut debugger, console) = scripted(config, &[]);
        {
            let mut session = debugger.session();
            let _ = tree.match_with(b"ABC", &mut *session).count();
        }
        let results = debugger.profile_results();
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|pair| pair[0].1 >= pair[1].1));
        assert!(results.iter().all(|(key, _)| matches!(key, ProfileKey::Test(_))));

        debugger.write_profile(&tree);
        let transcript = console.transcript();
        assert!(transcript.starts_with("Profile Results:\n"));
        for line in ["inline:1", "inline:2", "inline:4"] {
            assert!(transcript.contains(line), "{} missing", line);
        }
    }

    #[test]
    fn profile_command_when_disabled() {
        let tree = abc();
        let (mut debugger, console) = scripted(DebuggerConfig::default(), &["profile", "quit"]);
        debugger.repl(&tree, b"");
        assert!(console
            .transcript()
            .contains("Profiling is disabled.\nEnable it by running `set profile True`."));
    }

    #[test]
    fn stepping_through_parser_output() {
        let data = png();
        let m = png_match(&data);
        let (mut debugger, console) = scripted(DebuggerConfig::default(), &["y", "n", "y"]);
        let names: Vec<String> = {
            let mut session = debugger.session();
            Observed::new(&PngChunks, &data, &m, &mut *session).map(|s: Submatch| s.name).collect()
        };
        assert_eq!(names, vec!["IHDR", "IEND"]);
        assert_eq!(console.remaining(), 0);
        let transcript = console.transcript();
        assert!(transcript.contains("About to parse for submatches using PNG chunks."));
        assert!(transcript.contains("Got a submatch:\nIHDR @ 8+25"));
        assert!(transcript.contains("IEND @ 33+12: 0 byte(s) of chunk data"));
        assert!(!transcript.contains("Yielded all submatches"));
    }

    #[test]
    fn declining_to_step_keeps_parsers_quiet() {
        let data = png();
        let m = png_match(&data);
        let (mut debugger, console) = scripted(DebuggerConfig::default(), &[""]);
        let count = {
            let mut session = debugger.session();
            Observed::new(&PngChunks, &data, &m, &mut *session).count()
        };
        assert_eq!(count, 2);
        assert_eq!(console.remaining(), 0);
        assert!(!console.transcript().contains("Got a submatch"));
    }

    #[test]
    fn stepping_to_the_end_reports_it() {
        let data = png();
        let m = png_match(&data);
        let (mut debugger, console) = scripted(DebuggerConfig::default(), &["yes", "", ""]);
        {
            let mut session = debugger.session();
            let _ = Observed::new(&PngChunks, &data, &m, &mut *session).count();
        }
        let transcript = console.transcript();
        assert!(transcript.contains("Yielded all submatches from PNG chunks at offset 0."));
    }

    #[test]
    fn parsers_are_timed_when_profiling() {
        let data = png();
        let m = png_match(&data);
        let config = DebuggerConfig { break_on_parsing: false, profile: true, color: false };
        let (mut debugger, console) = scripted(config, &[]);
        {
            let mut session = debugger.session();
            assert_eq!(Observed::new(&PngChunks, &data, &m, &mut *session).count(), 2);
        }
        assert_eq!(console.transcript(), "");
        assert!(debugger
            .profile_results()
            .iter()
            .any(|(key, _)| *key == ProfileKey::Parser("PNG chunks".to_string())));
    }

    #[test]
    fn parsers_run_unobserved_outside_a_session() {
        let data = png();
        let m = png_match(&data);
        let (mut debugger, console) = scripted(DebuggerConfig::default(), &["y"]);
        assert_eq!(Observed::new(&PngChunks, &data, &m, &mut debugger).count(), 2);
        assert_eq!(console.remaining(), 1);
    }
}
