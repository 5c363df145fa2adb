//! Walks a [`MagicTree`] against a buffer.
//!
//! Every test evaluation goes through a [`TestEvaluator`]. [`Direct`] simply
//! runs the test; the debugger supplies its own evaluator to observe and pause
//! the walk.

use log::trace;

use super::{Match, MagicTree, TestId, TestResult};
use crate::MIME;

/// The dispatch point between the walker and a test's pattern logic.
pub trait TestEvaluator {
    /// Evaluates one test at an already resolved offset.
    fn evaluate(
        &mut self,
        tree: &MagicTree,
        id: TestId,
        data: &[u8],
        absolute_offset: u64,
        parent_match: Option<&Match>,
    ) -> TestResult;

    /// Asks the walker to stop yielding matches.
    fn should_stop(&self) -> bool {
        false
    }
}

impl<E: TestEvaluator + ?Sized> TestEvaluator for &mut E {
    fn evaluate(
        &mut self,
        tree: &MagicTree,
        id: TestId,
        data: &[u8],
        absolute_offset: u64,
        parent_match: Option<&Match>,
    ) -> TestResult {
        (**self).evaluate(tree, id, data, absolute_offset, parent_match)
    }

    fn should_stop(&self) -> bool {
        (**self).should_stop()
    }
}

/// Runs each test's own pattern logic with no interception.
#[derive(Debug, Default, Clone, Copy)]
pub struct Direct;

impl TestEvaluator for Direct {
    fn evaluate(
        &mut self,
        tree: &MagicTree,
        id: TestId,
        data: &[u8],
        absolute_offset: u64,
        _parent_match: Option<&Match>,
    ) -> TestResult {
        tree[id].test(id, data, absolute_offset)
    }
}

/// Lazy pre-order walk over a forest, yielding the matches of tests that carry a MIME type.
pub struct MatchAll<'t, 'd, E> {
    tree: &'t MagicTree,
    data: &'d [u8],
    evaluator: E,
    stack: Vec<(TestId, Option<Match>)>,
}

impl<'t, 'd, E: TestEvaluator> MatchAll<'t, 'd, E> {
    fn new(tree: &'t MagicTree, roots: &[TestId], data: &'d [u8], evaluator: E) -> Self {
        let stack = roots.iter().rev().map(|&r| (r, None)).collect();
        MatchAll { tree, data, evaluator, stack }
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }
}

impl<'t, 'd, E: TestEvaluator> Iterator for MatchAll<'t, 'd, E> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        while let Some((id, parent_match)) = self.stack.pop() {
            if self.evaluator.should_stop() {
                self.stack.clear();
                return None;
            }
            if !self.tree.can_produce_mime(id) {
                trace!("pruning test {}: no MIME type below it", id.index());
                continue;
            }
            let node = &self.tree[id];
            let offset = match node.offset.to_absolute(parent_match.as_ref()) {
                Ok(offset) => offset,
                Err(e) => {
                    trace!("pruning test {}: {}", id.index(), e);
                    continue;
                }
            };
            let result = self
                .evaluator
                .evaluate(self.tree, id, self.data, offset, parent_match.as_ref());
            trace!("test {} at {}: {:?}", id.index(), offset, result);
            if let TestResult::Matched(m) = result {
                for child in self.tree.children(id).into_iter().rev() {
                    self.stack.push((child, Some(m)));
                }
                if node.mime().is_some() {
                    return Some(m);
                }
            }
        }
        None
    }
}

impl MagicTree {
    /// All typed matches of `data`, most specific last.
    pub fn match_all<'t, 'd>(&'t self, data: &'d [u8]) -> MatchAll<'t, 'd, Direct> {
        self.match_with(data, Direct)
    }

    /// Like [`match_all`](MagicTree::match_all), routing every test through `evaluator`.
    pub fn match_with<'t, 'd, E: TestEvaluator>(
        &'t self,
        data: &'d [u8],
        evaluator: E,
    ) -> MatchAll<'t, 'd, E> {
        MatchAll::new(self, &self.roots, data, evaluator)
    }

    /// Walks only the given roots, e.g. those returned by [`only_match`](MagicTree::only_match).
    pub fn match_roots<'t, 'd, E: TestEvaluator>(
        &'t self,
        roots: &[TestId],
        data: &'d [u8],
        evaluator: E,
    ) -> MatchAll<'t, 'd, E> {
        MatchAll::new(self, roots, data, evaluator)
    }

    /// The MIME type of the most specific match, if any test matched.
    pub fn best_match(&self, data: &[u8]) -> Option<MIME> {
        self.match_all(data)
            .last()
            .and_then(|m| self[m.node].mime().map(str::to_string))
    }

    /// Identifies `data`, falling back to `text/plain` or `application/octet-stream`.
    pub fn identify(&self, data: &[u8]) -> MIME {
        self.best_match(data)
            .unwrap_or_else(|| crate::basetype::check::fallback(data).to_string())
    }
}
