//! The magic test tree: nodes, matches and the forest that holds them.
//!
//! Tests live in a `petgraph` arena; a test's parent is the source of its
//! single incoming edge and its children are its outgoing edges, in
//! declaration order.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::ops::Index;
use std::path::PathBuf;
use std::sync::OnceLock;

use fnv::{FnvHashMap, FnvHashSet};
use petgraph::prelude::*;

use crate::error::DefinitionErrorKind;
use crate::MIME;

pub mod builtin;
pub mod check;
pub mod datatype;
pub mod offset;
pub mod ruleset;

pub use check::{Direct, MatchAll, TestEvaluator};
pub use datatype::{DataType, ExpectedValue, NumericOperator, Pattern, TestKind};
pub use offset::Offset;

/// Handle to a test in a [`MagicTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId(NodeIndex);

impl TestId {
    pub fn new(index: usize) -> TestId {
        TestId(NodeIndex::new(index))
    }

    pub fn index(self) -> usize {
        self.0.index()
    }
}

/// Where a test was defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub line: usize,
    pub text: String,
}

impl SourceInfo {
    /// The final component of the path, as typed in `file:line` breakpoints.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// One rule of a definition file.
#[derive(Debug)]
pub struct TestNode {
    pub offset: Offset,
    pub pattern: Pattern,
    pub message: String,
    pub source: Option<SourceInfo>,
    mime: Option<MIME>,
    extensions: BTreeSet<String>,
    level: usize,
    can_produce_mime: OnceLock<bool>,
}

impl TestNode {
    pub fn new(offset: Offset, pattern: Pattern, message: impl Into<String>) -> TestNode {
        TestNode {
            offset,
            pattern,
            message: message.into(),
            source: None,
            mime: None,
            extensions: BTreeSet::new(),
            level: 0,
            can_produce_mime: OnceLock::new(),
        }
    }

    pub fn with_source(mut self, source: SourceInfo) -> TestNode {
        self.source = Some(source);
        self
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Runs this test's pattern at `absolute_offset`.
    ///
    /// An offset past the end of the data is an ordinary failed test.
    pub fn test(&self, id: TestId, data: &[u8], absolute_offset: u64) -> TestResult {
        let consumed = usize::try_from(absolute_offset)
            .ok()
            .and_then(|start| data.get(start..))
            .and_then(|window| self.pattern.matches(window));
        match consumed {
            Some(consumed) => TestResult::Matched(Match {
                node: id,
                offset: absolute_offset,
                length: consumed.len() as u64,
            }),
            None => TestResult::Failed {
                node: id,
                offset: absolute_offset,
                message: format!("expected {} {}", self.pattern.data_type, self.pattern.expected),
            },
        }
    }

    /// One definition line, with `>` indentation.
    pub fn definition_line(&self) -> String {
        let mut line = format!("{}{}\t{}", ">".repeat(self.level), self.offset, self.pattern);
        if !self.message.is_empty() {
            line.push('\t');
            line.push_str(&self.message);
        }
        line
    }
}

/// A successful test: which test matched, where, and how many bytes it consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Match {
    pub node: TestId,
    pub offset: u64,
    pub length: u64,
}

impl Match {
    /// The offset just past the consumed bytes; relative offsets count from here.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// The outcome of evaluating a single test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestResult {
    Matched(Match),
    Failed { node: TestId, offset: u64, message: String },
}

impl TestResult {
    pub fn is_match(&self) -> bool {
        matches!(self, TestResult::Matched(_))
    }

    pub fn as_match(&self) -> Option<&Match> {
        match self {
            TestResult::Matched(m) => Some(m),
            TestResult::Failed { .. } => None,
        }
    }

    pub fn node(&self) -> TestId {
        match self {
            TestResult::Matched(m) => m.node,
            TestResult::Failed { node, .. } => *node,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            TestResult::Matched(m) => m.offset,
            TestResult::Failed { offset, .. } => *offset,
        }
    }
}

/// A forest of magic tests plus MIME and extension indices over its roots.
#[derive(Debug, Default)]
pub struct MagicTree {
    graph: DiGraph<TestNode, ()>,
    roots: Vec<TestId>,
    roots_by_mime: FnvHashMap<MIME, FnvHashSet<TestId>>,
    roots_by_ext: FnvHashMap<String, FnvHashSet<TestId>>,
}

impl MagicTree {
    pub fn new() -> MagicTree {
        MagicTree::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn roots(&self) -> &[TestId] {
        &self.roots
    }

    pub fn node(&self, id: TestId) -> &TestNode {
        &self.graph[id.0]
    }

    pub fn add_root(&mut self, mut node: TestNode) -> TestId {
        node.level = 0;
        let id = TestId(self.graph.add_node(node));
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: TestId, mut node: TestNode) -> TestId {
        node.level = self.graph[parent.0].level + 1;
        let id = TestId(self.graph.add_node(node));
        self.graph.add_edge(parent.0, id.0, ());
        id
    }

    pub fn parent(&self, id: TestId) -> Option<TestId> {
        self.graph.neighbors_directed(id.0, Incoming).next().map(TestId)
    }

    /// Children in declaration order.
    pub fn children(&self, id: TestId) -> Vec<TestId> {
        // petgraph lists the most recently added edge first
        let mut children: Vec<TestId> =
            self.graph.neighbors_directed(id.0, Outgoing).map(TestId).collect();
        children.reverse();
        children
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, id: TestId) -> Ancestors<'_> {
        Ancestors { tree: self, next: self.parent(id) }
    }

    /// The root of the tree `id` belongs to.
    pub fn root_of(&self, id: TestId) -> TestId {
        self.ancestors(id).last().unwrap_or(id)
    }

    /// Strict descendants in pre-order.
    pub fn descendants(&self, id: TestId) -> Vec<TestId> {
        let mut out = Vec::new();
        let mut stack: Vec<TestId> = self.children(id).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    /// Attaches a MIME type to a test, marking every ancestor able to produce one.
    pub fn set_mime(&mut self, id: TestId, mime: &str) -> Result<(), DefinitionErrorKind> {
        let node = &mut self.graph[id.0];
        if let Some(existing) = &node.mime {
            return Err(DefinitionErrorKind::DuplicateMime {
                existing: existing.clone(),
                new: mime.to_string(),
            });
        }
        node.mime = Some(mime.to_string());
        node.can_produce_mime = OnceLock::from(true);
        let ancestors: Vec<TestId> = self.ancestors(id).collect();
        for ancestor in ancestors {
            let cache = &mut self.graph[ancestor.0].can_produce_mime;
            if cache.get() == Some(&true) {
                break;
            }
            *cache = OnceLock::from(true);
        }
        let root = self.root_of(id);
        self.roots_by_mime.entry(mime.to_string()).or_default().insert(root);
        Ok(())
    }

    pub fn add_extension(&mut self, id: TestId, ext: &str) {
        self.graph[id.0].extensions.insert(ext.to_string());
        let root = self.root_of(id);
        self.roots_by_ext.entry(ext.to_string()).or_default().insert(root);
    }

    /// Whether this test or one of its descendants carries a MIME type.
    pub fn can_produce_mime(&self, id: TestId) -> bool {
        *self.graph[id.0]
            .can_produce_mime
            .get_or_init(|| self.children(id).into_iter().any(|c| self.can_produce_mime(c)))
    }

    /// Every MIME type this test or its descendants can produce.
    pub fn mimetypes_of(&self, id: TestId) -> BTreeSet<&str> {
        std::iter::once(id)
            .chain(self.descendants(id))
            .filter_map(|t| self.node(t).mime())
            .collect()
    }

    /// Every extension declared by this test or its descendants.
    pub fn extensions_of(&self, id: TestId) -> BTreeSet<&str> {
        std::iter::once(id)
            .chain(self.descendants(id))
            .flat_map(|t| self.node(t).extensions.iter().map(String::as_str))
            .collect()
    }

    /// All MIME types declared anywhere in the forest.
    pub fn mimetypes(&self) -> BTreeSet<&str> {
        self.roots_by_mime.keys().map(String::as_str).collect()
    }

    /// All extensions declared anywhere in the forest.
    pub fn extensions(&self) -> BTreeSet<&str> {
        self.roots_by_ext.keys().map(String::as_str).collect()
    }

    /// Roots of the trees able to produce `mime`, in declaration order.
    pub fn tests_by_mime(&self, mime: &str) -> Vec<TestId> {
        self.roots_in_order(self.roots_by_mime.get(mime))
    }

    /// Roots of the trees declaring `ext`, in declaration order.
    pub fn tests_by_ext(&self, ext: &str) -> Vec<TestId> {
        self.roots_in_order(self.roots_by_ext.get(ext))
    }

    /// Roots able to produce any of `mimes` or declaring any of `exts`.
    pub fn only_match(&self, mimes: &[&str], exts: &[&str]) -> Vec<TestId> {
        let wanted: FnvHashSet<TestId> = mimes
            .iter()
            .filter_map(|m| self.roots_by_mime.get(*m))
            .chain(exts.iter().filter_map(|e| self.roots_by_ext.get(*e)))
            .flatten()
            .copied()
            .collect();
        self.roots.iter().copied().filter(|r| wanted.contains(r)).collect()
    }

    fn roots_in_order(&self, set: Option<&FnvHashSet<TestId>>) -> Vec<TestId> {
        match set {
            Some(set) => self.roots.iter().copied().filter(|r| set.contains(r)).collect(),
            None => Vec::new(),
        }
    }

    /// Serialises the forest back to definition-file text.
    pub fn to_definitions(&self) -> String {
        let mut out = String::new();
        for &root in &self.roots {
            for id in std::iter::once(root).chain(self.descendants(root)) {
                let node = self.node(id);
                let _ = writeln!(out, "{}", node.definition_line());
                if let Some(mime) = node.mime() {
                    let _ = writeln!(out, "!:mime\t{}", mime);
                }
                for ext in &node.extensions {
                    let _ = writeln!(out, "!:ext\t{}", ext);
                }
            }
        }
        out
    }

    /// Moves every test of `other` into this forest, after the existing roots.
    pub(crate) fn graft(&mut self, other: MagicTree) -> Vec<TestId> {
        let base = self.graph.node_count();
        let shift = |id: NodeIndex| NodeIndex::new(base + id.index());
        let (nodes, edges) = other.graph.into_nodes_edges();
        for node in nodes {
            self.graph.add_node(node.weight);
        }
        for edge in edges {
            self.graph.add_edge(shift(edge.source()), shift(edge.target()), ());
        }
        let new_roots: Vec<TestId> = other.roots.iter().map(|r| TestId(shift(r.0))).collect();
        self.roots.extend(&new_roots);
        for (mime, roots) in other.roots_by_mime {
            self.roots_by_mime
                .entry(mime)
                .or_default()
                .extend(roots.into_iter().map(|r| TestId(shift(r.0))));
        }
        for (ext, roots) in other.roots_by_ext {
            self.roots_by_ext
                .entry(ext)
                .or_default()
                .extend(roots.into_iter().map(|r| TestId(shift(r.0))));
        }
        new_roots
    }
}

impl Index<TestId> for MagicTree {
    type Output = TestNode;

    fn index(&self, id: TestId) -> &TestNode {
        self.node(id)
    }
}

pub struct Ancestors<'t> {
    tree: &'t MagicTree,
    next: Option<TestId>,
}

impl<'t> Iterator for Ancestors<'t> {
    type Item = TestId;

    fn next(&mut self) -> Option<TestId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(expected: &str) -> TestNode {
        TestNode::new(Offset::Absolute(0), Pattern::parse("string", expected).unwrap(), "")
    }

    #[test]
    fn levels_follow_parents() {
        let mut tree = MagicTree::new();
        let root = tree.add_root(node("a"));
        let child = tree.add_child(root, node("b"));
        let grandchild = tree.add_child(child, node("c"));
        assert_eq!(tree[root].level(), 0);
        assert_eq!(tree[grandchild].level(), 2);
        assert_eq!(tree.ancestors(grandchild).collect::<Vec<_>>(), vec![child, root]);
        assert_eq!(tree.root_of(grandchild), root);
    }

    #[test]
    fn children_keep_declaration_order() {
        let mut tree = MagicTree::new();
        let root = tree.add_root(node("a"));
        let first = tree.add_child(root, node("b"));
        let second = tree.add_child(root, node("c"));
        let nested = tree.add_child(first, node("d"));
        assert_eq!(tree.children(root), vec![first, second]);
        assert_eq!(tree.descendants(root), vec![first, nested, second]);
    }

    #[test]
    fn mime_propagates_to_every_ancestor() {
        let mut tree = MagicTree::new();
        let root = tree.add_root(node("a"));
        let mid = tree.add_child(root, node("b"));
        let sibling = tree.add_child(root, node("x"));
        let leaf = tree.add_child(mid, node("c"));
        assert!(!tree.can_produce_mime(leaf));
        assert!(!tree.can_produce_mime(root));

        tree.set_mime(leaf, "a/b").unwrap();
        assert!(tree.can_produce_mime(leaf));
        assert!(tree.can_produce_mime(mid));
        assert!(tree.can_produce_mime(root));
        assert!(!tree.can_produce_mime(sibling));
        assert_eq!(tree.tests_by_mime("a/b"), vec![root]);
    }

    #[test]
    fn duplicate_mime_is_rejected() {
        let mut tree = MagicTree::new();
        let root = tree.add_root(node("a"));
        tree.set_mime(root, "a/b").unwrap();
        assert!(matches!(
            tree.set_mime(root, "a/b"),
            Err(DefinitionErrorKind::DuplicateMime { .. })
        ));
        assert!(matches!(
            tree.set_mime(root, "c/d"),
            Err(DefinitionErrorKind::DuplicateMime { .. })
        ));
        assert_eq!(tree[root].mime(), Some("a/b"));
    }

    #[test]
    fn reachable_mimes_and_extensions() {
        let mut tree = MagicTree::new();
        let root = tree.add_root(node("a"));
        let child = tree.add_child(root, node("b"));
        tree.set_mime(child, "x/y").unwrap();
        tree.add_extension(child, "xy");
        let other = tree.add_root(node("z"));
        tree.add_extension(other, "zz");

        assert_eq!(tree.mimetypes_of(root).into_iter().collect::<Vec<_>>(), vec!["x/y"]);
        assert_eq!(tree.extensions_of(root).into_iter().collect::<Vec<_>>(), vec!["xy"]);
        assert_eq!(tree.extensions().into_iter().collect::<Vec<_>>(), vec!["xy", "zz"]);
        assert_eq!(tree.only_match(&["x/y"], &["zz"]), vec![root, other]);
        assert_eq!(tree.only_match(&[], &["zz"]), vec![other]);
        assert!(tree.only_match(&["nope/nope"], &[]).is_empty());
    }

    #[test]
    fn graft_preserves_structure() {
        let mut first = MagicTree::new();
        let a = first.add_root(node("a"));
        first.set_mime(a, "a/a").unwrap();

        let mut second = MagicTree::new();
        let b = second.add_root(node("b"));
        let c = second.add_child(b, node("c"));
        let d = second.add_child(b, node("d"));
        second.set_mime(d, "d/d").unwrap();
        let _ = c;

        let grafted = first.graft(second);
        assert_eq!(grafted.len(), 1);
        let new_b = grafted[0];
        assert_eq!(first.roots(), &[a, new_b]);
        assert_eq!(first.children(new_b).len(), 2);
        assert_eq!(first.tests_by_mime("d/d"), vec![new_b]);
        assert!(first.can_produce_mime(new_b));
        assert_eq!(first[first.children(new_b)[1]].mime(), Some("d/d"));
    }

    #[test]
    fn failed_test_past_the_end() {
        let mut tree = MagicTree::new();
        let root = tree.add_root(node("a"));
        let result = tree[root].test(root, b"abc", 10);
        assert!(!result.is_match());
        assert_eq!(result.offset(), 10);
    }
}
