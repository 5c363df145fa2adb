//! Which evaluations a debugger session intercepts.

use std::collections::BTreeSet;

use log::debug;

use crate::magic::TestKind;

/// The set of test kinds and parsers routed through the debugger.
///
/// Nothing is intercepted until [`install`](Instrumentation::install) is called,
/// so an idle debugger evaluates exactly like [`Direct`](crate::magic::Direct).
#[derive(Debug, Default, Clone)]
pub struct Instrumentation {
    tests: BTreeSet<TestKind>,
    parsers: bool,
}

impl Instrumentation {
    pub fn new() -> Instrumentation {
        Instrumentation::default()
    }

    /// Intercepts the given test kinds, and structural parsers if `parsers` is set.
    ///
    /// Installing twice replaces the previous installation.
    pub fn install(&mut self, kinds: impl IntoIterator<Item = TestKind>, parsers: bool) {
        self.uninstall();
        self.tests.extend(kinds);
        self.parsers = parsers;
        debug!("instrumented {} test kinds (parsers: {})", self.tests.len(), parsers);
    }

    pub fn uninstall(&mut self) {
        if self.is_installed() {
            debug!("removing instrumentation");
        }
        self.tests.clear();
        self.parsers = false;
    }

    pub fn is_installed(&self) -> bool {
        !self.tests.is_empty() || self.parsers
    }

    pub fn kinds(&self) -> impl Iterator<Item = TestKind> + '_ {
        self.tests.iter().copied()
    }

    pub fn intercepts(&self, kind: TestKind) -> bool {
        self.tests.contains(&kind)
    }

    pub fn intercepts_parsers(&self) -> bool {
        self.parsers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_and_uninstall_are_idempotent() {
        let mut instrumentation = Instrumentation::new();
        assert!(!instrumentation.intercepts(TestKind::Integer));

        instrumentation.install(TestKind::ALL, true);
        instrumentation.install(TestKind::ALL, false);
        assert!(TestKind::ALL.iter().all(|&k| instrumentation.intercepts(k)));
        assert!(!instrumentation.intercepts_parsers());

        instrumentation.uninstall();
        instrumentation.uninstall();
        assert!(!instrumentation.is_installed());
        assert!(!instrumentation.intercepts(TestKind::String));
    }

    #[test]
    fn reinstalling_replaces_the_kinds() {
        let mut instrumentation = Instrumentation::new();
        instrumentation.install(TestKind::ALL, false);
        instrumentation.install([TestKind::Regex, TestKind::Integer], false);
        let kinds: Vec<TestKind> = instrumentation.kinds().collect();
        assert_eq!(kinds, vec![TestKind::Regex, TestKind::Integer]);
        assert!(!instrumentation.intercepts(TestKind::String));

        // parsers alone still count as installed
        instrumentation.install([], true);
        assert!(instrumentation.is_installed());
        assert!(!instrumentation.intercepts(TestKind::Integer));
    }
}
