mod match_u8 {
    extern crate magic_tree;

    ///Image tests
    #[test]
    fn image_gif() {
        assert!(magic_tree::match_u8("image/gif", b"GIF87a\x01\x00\x01\x00"));
    }
    #[test]
    fn image_png() {
        assert!(magic_tree::match_u8("image/png", b"\x89PNG\r\n\x1a\n"));
    }
    #[test]
    fn image_png_is_not_gif() {
        assert!(!magic_tree::match_u8("image/gif", b"\x89PNG\r\n\x1a\n"));
    }

    /// Archive tests
    #[test]
    fn application_zip() {
        assert!(magic_tree::match_u8("application/zip", b"PK\x03\x04"));
    }

    /// Executables are only typed by their children
    #[test]
    fn application_x_executable() {
        let elf = b"\x7fELF\x01\x01\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x02\x00";
        assert!(magic_tree::match_u8("application/x-executable", elf));
        assert!(!magic_tree::match_u8("application/x-sharedlib", elf));
    }

    /// Base types
    #[test]
    fn text_plain() {
        assert!(magic_tree::match_u8("text/plain", b"plain words"));
        assert!(!magic_tree::match_u8("text/plain", b"nul\0byte"));
    }
    #[test]
    fn application_octet_stream() {
        assert!(magic_tree::match_u8("application/octet-stream", b"\x00\xff"));
        assert!(magic_tree::match_u8("application/octet-stream", b"anything at all"));
    }
    #[test]
    fn unknown_type_never_matches() {
        assert!(!magic_tree::match_u8("application/x-nonexistent", b"PK\x03\x04"));
    }
}
