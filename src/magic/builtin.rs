//! Read the definitions bundled in the crate

use super::{ruleset, MagicTree};

/// Load the bundled definitions before anything else.
lazy_static! {
    pub static ref BUILTIN: MagicTree = {
        ruleset::from_str(include_str!("definitions"), "builtin").unwrap_or_else(|e| {
            log::error!("bundled definitions failed to load: {}", e);
            MagicTree::new()
        })
    };
}
