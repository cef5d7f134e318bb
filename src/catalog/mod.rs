//! Version-indexed query catalog: a height-balanced binary search tree per
//! metric, keyed by the minimum server (or extension) version an alternative
//! applies to. Lookup returns the alternative with the greatest key `<= v`.

use snafu::Snafu;

use crate::pg::{ColumnDef, ColumnKind};

#[derive(Debug, Snafu)]
pub enum CatalogError {
    #[snafu(display("duplicate metric tag: {}", tag))]
    DuplicateTag { tag: String },
}

/// Semantic version triple used to key extension-query alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// One SQL text plus its declared output columns, tagged with the minimum
/// version it applies to.
#[derive(Debug, Clone)]
pub struct Alternative<K> {
    pub version: K,
    pub sql: String,
    pub columns: Vec<ColumnDef>,
}

struct Node<K> {
    alternative: Alternative<K>,
    height: i32,
    left: Option<Box<Node<K>>>,
    right: Option<Box<Node<K>>>,
}

impl<K: Ord + Copy> Node<K> {
    fn new(alternative: Alternative<K>) -> Self {
        Node {
            alternative,
            height: 1,
            left: None,
            right: None,
        }
    }
}

fn height<K>(node: &Option<Box<Node<K>>>) -> i32 {
    node.as_ref().map_or(0, |n| n.height)
}

fn balance_factor<K>(node: &Node<K>) -> i32 {
    height(&node.left) - height(&node.right)
}

fn update_height<K>(node: &mut Node<K>) {
    node.height = 1 + height(&node.left).max(height(&node.right));
}

fn rotate_right<K>(mut node: Box<Node<K>>) -> Box<Node<K>> {
    let mut left = node.left.take().expect("rotate_right requires a left child");
    node.left = left.right.take();
    update_height(&mut node);
    left.right = Some(node);
    update_height(&mut left);
    left
}

fn rotate_left<K>(mut node: Box<Node<K>>) -> Box<Node<K>> {
    let mut right = node.right.take().expect("rotate_left requires a right child");
    node.right = right.left.take();
    update_height(&mut node);
    right.left = Some(node);
    update_height(&mut right);
    right
}

fn rebalance<K>(mut node: Box<Node<K>>) -> Box<Node<K>> {
    update_height(&mut node);
    let bf = balance_factor(&node);
    if bf > 1 {
        if balance_factor(node.left.as_ref().unwrap()) < 0 {
            node.left = Some(rotate_left(node.left.take().unwrap()));
        }
        return rotate_right(node);
    }
    if bf < -1 {
        if balance_factor(node.right.as_ref().unwrap()) > 0 {
            node.right = Some(rotate_right(node.right.take().unwrap()));
        }
        return rotate_left(node);
    }
    node
}

/// `true` if the alternative was inserted; `false` if its version already
/// existed (duplicate keys are rejected rather than overwritten).
fn insert<K: Ord + Copy>(
    node: Option<Box<Node<K>>>,
    alternative: Alternative<K>,
) -> (Option<Box<Node<K>>>, bool) {
    match node {
        None => (Some(Box::new(Node::new(alternative))), true),
        Some(mut n) => {
            let inserted;
            match alternative.version.cmp(&n.alternative.version) {
                std::cmp::Ordering::Less => {
                    let (left, did_insert) = insert(n.left.take(), alternative);
                    n.left = left;
                    inserted = did_insert;
                }
                std::cmp::Ordering::Greater => {
                    let (right, did_insert) = insert(n.right.take(), alternative);
                    n.right = right;
                    inserted = did_insert;
                }
                std::cmp::Ordering::Equal => {
                    return (Some(n), false);
                }
            }
            (Some(rebalance(n)), inserted)
        }
    }
}

fn lookup<'a, K: Ord>(
    mut node: Option<&'a Node<K>>,
    version: K,
) -> Option<&'a Alternative<K>> {
    let mut best: Option<&Alternative<K>> = None;
    while let Some(n) = node {
        match n.alternative.version.cmp(&version) {
            std::cmp::Ordering::Greater => node = n.left.as_deref(),
            std::cmp::Ordering::Equal => return Some(&n.alternative),
            std::cmp::Ordering::Less => {
                best = Some(&n.alternative);
                node = n.right.as_deref();
            }
        }
    }
    best
}

fn max_height<K>(node: &Option<Box<Node<K>>>) -> i32 {
    match node {
        None => 0,
        Some(n) => {
            let lh = max_height(&n.left);
            let rh = max_height(&n.right);
            debug_assert!((lh - rh).abs() <= 1, "AVL balance invariant violated");
            1 + lh.max(rh)
        }
    }
}

/// An AVL tree of version-keyed query alternatives for one metric.
#[derive(Default)]
pub struct VersionTree<K> {
    root: Option<Box<Node<K>>>,
}

impl<K: Ord + Copy> VersionTree<K> {
    pub fn new() -> Self {
        VersionTree { root: None }
    }

    /// Insert `alternative`. Returns `false` if its version duplicates an
    /// existing node (the incoming alternative is dropped).
    pub fn insert(&mut self, alternative: Alternative<K>) -> bool {
        let (root, inserted) = insert(self.root.take(), alternative);
        self.root = root;
        inserted
    }

    /// Greatest-key-`<=`-`version` lookup, or `None` if no such key exists.
    pub fn lookup(&self, version: K) -> Option<&Alternative<K>> {
        lookup(self.root.as_deref(), version)
    }

    pub fn height(&self) -> i32 {
        max_height(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

/// Core-PostgreSQL alternatives are keyed by a single integer major version.
pub type CoreVersion = u32;

/// Extension alternatives are additionally keyed by extension name; the name
/// is carried alongside the tree rather than in the key, since one metric's
/// extension tree only ever holds alternatives for its own declared
/// extension.
pub struct Metric {
    pub tag: String,
    pub help: String,
    pub collector_group: String,
    pub sort_mode: SortMode,
    pub server_filter: ServerFilter,
    pub exec_on_all_databases: bool,
    pub core: VersionTree<CoreVersion>,
    pub extension_name: Option<String>,
    pub extension: VersionTree<SemVer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    ByName,
    ByFirstDataColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFilter {
    Both,
    PrimaryOnly,
    ReplicaOnly,
}

/// Either tree can answer a lookup; the two are keyed differently (integer
/// major version vs. semantic version triple) so the caller picks a side
/// based on the tie-break policy before looking at SQL text.
pub enum Chosen<'a> {
    Core(&'a Alternative<CoreVersion>),
    Extension(&'a Alternative<SemVer>),
}

impl Chosen<'_> {
    pub fn sql(&self) -> &str {
        match self {
            Chosen::Core(a) => &a.sql,
            Chosen::Extension(a) => &a.sql,
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        match self {
            Chosen::Core(a) => &a.columns,
            Chosen::Extension(a) => &a.columns,
        }
    }
}

impl Metric {
    /// Choose the best alternative for a server at `core_version`, preferring
    /// the extension alternative over the core one when `extension_version`
    /// is `Some` and the extension tree has an eligible entry, per the
    /// tie-break policy.
    pub fn choose(
        &self,
        core_version: CoreVersion,
        extension_version: Option<SemVer>,
    ) -> Option<Chosen<'_>> {
        if let Some(ext_version) = extension_version {
            if let Some(alt) = self.extension.lookup(ext_version) {
                return Some(Chosen::Extension(alt));
            }
        }
        self.core.lookup(core_version).map(Chosen::Core)
    }
}
