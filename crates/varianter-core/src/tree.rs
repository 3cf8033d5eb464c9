//! Labeled parameter tree.
//!
//! Nodes live in an arena owned by [`Tree`] and are addressed by [`NodeId`].
//! Parent links are plain indices, so a detached node simply stops being
//! reachable from the root.

use crate::control::{Control, controls_to_string};
use crate::value::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Errors raised by tree navigation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    #[error("no such path '{path}' (missing segment '{segment}')")]
    NoSuchPath { path: String, segment: String },
}

/// Index of a node inside its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Include/exclude path lists scoped to one node. Duplicates are discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub filter_only: Vec<String>,
    pub filter_out: Vec<String>,
}

impl Filters {
    pub fn add_only(&mut self, path: impl Into<String>) {
        push_unique(&mut self.filter_only, path.into());
    }

    pub fn add_out(&mut self, path: impl Into<String>) {
        push_unique(&mut self.filter_out, path.into());
    }

    pub fn extend(&mut self, other: &Self) {
        for path in &other.filter_only {
            self.add_only(path.clone());
        }
        for path in &other.filter_out {
            self.add_out(path.clone());
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filter_only.is_empty() && self.filter_out.is_empty()
    }
}

fn push_unique(list: &mut Vec<String>, path: String) {
    if !list.contains(&path) {
        list.push(path);
    }
}

/// Payload of one tree position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub name: String,
    pub value: ValueMap,
    pub control: Vec<Control>,
    pub filters: Filters,
    /// Unset, or explicitly marked. Only `Some(true)` opens a multiplex domain.
    pub multiplex: Option<bool>,
}

impl Node {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.value.insert(key, value.into());
        self
    }

    #[must_use]
    pub const fn with_multiplex(mut self, multiplex: bool) -> Self {
        self.multiplex = Some(multiplex);
        self
    }

    #[must_use]
    pub fn with_control(mut self, control: Control) -> Self {
        self.control.push(control);
        self
    }

    #[must_use]
    pub fn with_filter_only(mut self, path: impl Into<String>) -> Self {
        self.filters.add_only(path);
        self
    }

    #[must_use]
    pub fn with_filter_out(mut self, path: impl Into<String>) -> Self {
        self.filters.add_out(path);
        self
    }

    #[must_use]
    pub const fn is_multiplex(&self) -> bool {
        matches!(self.multiplex, Some(true))
    }
}

#[derive(Debug, Clone)]
struct Slot {
    node: Node,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed tree rooted at an unnamed node.
#[derive(Debug, Clone)]
pub struct Tree {
    slots: Vec<Slot>,
    root: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create a tree holding only the root.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(Node::default())
    }

    #[must_use]
    pub fn with_root(node: Node) -> Self {
        Self {
            slots: vec![Slot {
                node,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.slots[id.0].node
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.slots[id.0].node
    }

    #[must_use]
    pub fn name(&self, id: NodeId) -> &str {
        &self.slots[id.0].node.name
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.0].parent
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.0].children
    }

    #[must_use]
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.slots[id.0].children.is_empty()
    }

    #[must_use]
    pub fn child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&child| self.name(child) == name)
    }

    /// Attach `node` under `parent`. A same-named child absorbs it via
    /// [`Tree::merge`] instead, and its id is returned.
    pub fn add_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        if let Some(existing) = self.child_by_name(parent, &node.name) {
            let donor = Self::with_root(node);
            self.merge(existing, &donor, donor.root);
            return existing;
        }
        self.push_child(parent, node)
    }

    fn push_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            node,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.slots[parent.0].children.push(id);
        id
    }

    /// Merge node `src` of `other` into `target` of this tree.
    ///
    /// Order: the donor's control entries, then values (list + list
    /// extends, everything else overwrites), then children, then the
    /// multiplex mark (only when set on the donor), then filters.
    pub fn merge(&mut self, target: NodeId, other: &Self, src: NodeId) {
        let donor = other.node(src);
        for control in &donor.control {
            match control {
                Control::RemoveNode(pattern) => {
                    let doomed: Vec<NodeId> = self
                        .children(target)
                        .iter()
                        .copied()
                        .filter(|&child| pattern.is_match(self.name(child)))
                        .collect();
                    for child in doomed {
                        tracing::debug!(node = %self.path(child), "removing node");
                        self.detach(child);
                    }
                }
                Control::RemoveValue(pattern) => {
                    self.node_mut(target)
                        .value
                        .retain(|key, _| !pattern.is_match(key));
                }
                _ => {}
            }
        }

        let node = self.node_mut(target);
        for (key, value) in donor.value.iter() {
            match node.value.get_mut(key) {
                Some(current) => current.extend_or_replace(value.clone()),
                None => {
                    node.value.insert(key, value.clone());
                }
            }
        }

        for &child in other.children(src) {
            self.add_subtree(target, other, child);
        }

        let node = self.node_mut(target);
        if donor.multiplex.is_some() {
            node.multiplex = donor.multiplex;
        }
        node.filters.extend(&donor.filters);
    }

    /// Merge the whole of `other` into this tree's root.
    pub fn merge_tree(&mut self, other: &Self) {
        self.merge(self.root, other, other.root);
    }

    /// Add the whole of `other` as a child of `parent`, merging into a
    /// same-named child when there is one.
    pub fn graft(&mut self, parent: NodeId, other: &Self) {
        self.add_subtree(parent, other, other.root);
    }

    /// Copy `src` of `other` (with its descendants) under `parent`.
    fn add_subtree(&mut self, parent: NodeId, other: &Self, src: NodeId) {
        if let Some(existing) = self.child_by_name(parent, other.name(src)) {
            self.merge(existing, other, src);
            return;
        }
        let id = self.push_child(parent, other.node(src).clone());
        for &child in other.children(src) {
            self.add_subtree(id, other, child);
        }
    }

    /// Walk `path` from `from`, skipping empty segments. With `create`,
    /// missing segments are materialized as empty nodes; without it this is
    /// [`Tree::node_at`].
    ///
    /// # Errors
    /// Returns `TreeError::NoSuchPath` when a segment is missing and
    /// `create` is false.
    pub fn get_node(&mut self, from: NodeId, path: &str, create: bool) -> Result<NodeId, TreeError> {
        if !create {
            return self.node_at(from, path);
        }
        let mut current = from;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = match self.child_by_name(current, segment) {
                Some(child) => child,
                None => self.push_child(current, Node::new(segment)),
            };
        }
        Ok(current)
    }

    /// Walk `path` from `from` without modifying the tree.
    ///
    /// # Errors
    /// Returns `TreeError::NoSuchPath` naming the first missing segment.
    pub fn node_at(&self, from: NodeId, path: &str) -> Result<NodeId, TreeError> {
        let mut current = from;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self
                .child_by_name(current, segment)
                .ok_or_else(|| TreeError::NoSuchPath {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })?;
        }
        Ok(current)
    }

    /// Like [`Tree::node_at`], without the error.
    #[must_use]
    pub fn find_node(&self, from: NodeId, path: &str) -> Option<NodeId> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(from, |current, segment| self.child_by_name(current, segment))
    }

    /// Unlink `id` from its parent. Detaching twice is a no-op.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.slots[id.0].parent.take() {
            self.slots[parent.0].children.retain(|&child| child != id);
        }
    }

    /// Ancestors of `id`, nearest first.
    #[must_use]
    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent(parent);
        }
        out
    }

    /// `/`-joined names from the root; the root itself is `/`.
    #[must_use]
    pub fn path(&self, id: NodeId) -> String {
        let mut names: Vec<&str> = self.parents(id).iter().map(|&p| self.name(p)).collect();
        names.reverse();
        names.push(self.name(id));
        let path = names.join("/");
        if path.is_empty() { "/".to_string() } else { path }
    }

    /// Preorder iteration: `id` first, then each child's subtree in order.
    #[must_use]
    pub fn preorder(&self, id: NodeId) -> Preorder<'_> {
        Preorder {
            tree: self,
            stack: vec![id],
        }
    }

    pub fn leaves(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.preorder(id).filter(|&node| self.is_leaf(node))
    }

    /// Fold values from the root down to `id`.
    #[must_use]
    pub fn environment(&self, id: NodeId) -> Environment {
        let mut chain = self.parents(id);
        chain.reverse();
        chain.push(id);

        let mut env = Environment::default();
        for node_id in chain {
            let node = self.node(node_id);
            let origin = self.path(node_id);
            for (key, value) in node.value.iter() {
                env.apply(key, value.clone(), &origin);
            }
            for path in &node.filters.filter_only {
                env.filter_only.insert(path);
            }
            for path in &node.filters.filter_out {
                env.filter_out.insert(path);
            }
        }
        env
    }

    /// Identity string of `id` used to derive variant ids.
    #[must_use]
    pub fn fingerprint(&self, id: NodeId) -> String {
        let env = self.environment(id);
        format!(
            "{}{},{}",
            self.path(id),
            env,
            controls_to_string(&self.node(id).control)
        )
    }

    /// Draw the subtree under `id`. Children of multiplex nodes use double
    /// lines. With `verbose`, each node's values are listed below it, and
    /// with `verbose > 1` also its filters.
    #[must_use]
    pub fn tree_view(&self, id: NodeId, verbose: u8, use_utf8: bool) -> String {
        let mut lines = Vec::new();
        let name = if id == self.root { "/" } else { self.name(id) };
        lines.push(name.to_string());
        self.describe_node(id, verbose, use_utf8, "", &mut lines);
        self.view_children(id, verbose, use_utf8, "", &mut lines);
        lines.join("\n")
    }

    fn view_children(
        &self,
        id: NodeId,
        verbose: u8,
        use_utf8: bool,
        prefix: &str,
        lines: &mut Vec<String>,
    ) {
        let glyphs = Glyphs::pick(self.node(id).is_multiplex(), use_utf8);
        let children = self.children(id);
        for (index, &child) in children.iter().enumerate() {
            let last = index + 1 == children.len();
            let (branch, pad) = if last {
                (glyphs.last, "    ")
            } else {
                (glyphs.branch, glyphs.pipe)
            };
            lines.push(format!("{prefix}{branch}{}", self.name(child)));
            let nested = format!("{prefix}{pad}");
            self.describe_node(child, verbose, use_utf8, &nested, lines);
            self.view_children(child, verbose, use_utf8, &nested, lines);
        }
    }

    fn describe_node(
        &self,
        id: NodeId,
        verbose: u8,
        use_utf8: bool,
        prefix: &str,
        lines: &mut Vec<String>,
    ) {
        if verbose == 0 {
            return;
        }
        let arrow = if use_utf8 { "\u{2192}" } else { "->" };
        let node = self.node(id);
        for (key, value) in node.value.iter() {
            lines.push(format!("{prefix}    {arrow} {key}: {value}"));
        }
        if verbose > 1 {
            if !node.filters.filter_only.is_empty() {
                lines.push(format!(
                    "{prefix}    filter-only: {}",
                    node.filters.filter_only.join(", ")
                ));
            }
            if !node.filters.filter_out.is_empty() {
                lines.push(format!(
                    "{prefix}    filter-out: {}",
                    node.filters.filter_out.join(", ")
                ));
            }
        }
    }

    fn subtree_eq(&self, id: NodeId, other: &Self, other_id: NodeId) -> bool {
        let (mine, theirs) = (self.children(id), other.children(other_id));
        self.node(id) == other.node(other_id)
            && mine.len() == theirs.len()
            && mine
                .iter()
                .zip(theirs)
                .all(|(&a, &b)| self.subtree_eq(a, other, b))
    }
}

/// Structural equality over the parts reachable from each root.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.subtree_eq(self.root, other, other.root)
    }
}

struct Glyphs {
    branch: &'static str,
    last: &'static str,
    pipe: &'static str,
}

impl Glyphs {
    const fn pick(multiplex: bool, use_utf8: bool) -> Self {
        match (multiplex, use_utf8) {
            (true, true) => Self {
                branch: "\u{2560}\u{2550}\u{2550} ",
                last: "\u{255a}\u{2550}\u{2550} ",
                pipe: "\u{2551}   ",
            },
            (false, true) => Self {
                branch: "\u{2523}\u{2501}\u{2501} ",
                last: "\u{2517}\u{2501}\u{2501} ",
                pipe: "\u{2503}   ",
            },
            (true, false) => Self {
                branch: "+== ",
                last: "\\== ",
                pipe: "|   ",
            },
            (false, false) => Self {
                branch: "+-- ",
                last: "\\-- ",
                pipe: "|   ",
            },
        }
    }
}

/// Preorder iterator over node ids.
pub struct Preorder<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl Iterator for Preorder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(id).iter().rev().copied());
        Some(id)
    }
}

/// Sorted set of filter paths, each normalized to end with `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet(BTreeSet<String>);

impl FilterSet {
    /// Insert `path` with a trailing `/`. Empty paths are ignored.
    pub fn insert(&mut self, path: &str) {
        if path.is_empty() {
            return;
        }
        let normalized = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        self.0.insert(normalized);
    }

    pub fn extend(&mut self, other: &Self) {
        self.0.extend(other.0.iter().cloned());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.0.iter().map(|p| format!("'{p}'")).collect();
        write!(f, "{{{}}}", items.join(", "))
    }
}

/// One resolved key of a leaf environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvEntry {
    pub key: String,
    pub value: Value,
    /// Path of the node that supplied `value`.
    pub origin: String,
}

/// Resolved mapping of a leaf, with the origin of every key and the union
/// of the filters declared along its ancestry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    entries: Vec<EnvEntry>,
    pub filter_only: FilterSet,
    pub filter_out: FilterSet,
}

impl Environment {
    /// Apply `value` from `origin` using the inheritance rule: lists
    /// extend lists, anything else overwrites.
    pub fn apply(&mut self, key: &str, value: Value, origin: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            entry.value.extend_or_replace(value);
            origin.clone_into(&mut entry.origin);
            return;
        }
        self.entries.push(EnvEntry {
            key: key.to_string(),
            value,
            origin: origin.to_string(),
        });
    }

    /// Set an entry verbatim, replacing any previous value.
    pub fn set(&mut self, key: &str, value: Value, origin: &str) {
        self.entries.retain(|e| e.key != key);
        self.entries.push(EnvEntry {
            key: key.to_string(),
            value,
            origin: origin.to_string(),
        });
    }

    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&EnvEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entry(key).map(|e| &e.value)
    }

    #[must_use]
    pub fn origin(&self, key: &str) -> Option<&str> {
        self.entry(key).map(|e| e.origin.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Environment {
    /// `{k: v, ...},{k: origin, ...},{filter_only},{filter_out}` with keys sorted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sorted: Vec<&EnvEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        let values: Vec<String> = sorted
            .iter()
            .map(|e| format!("{}: {}", e.key, e.value.repr()))
            .collect();
        let origins: Vec<String> = sorted
            .iter()
            .map(|e| format!("{}: {}", e.key, e.origin))
            .collect();
        write!(
            f,
            "{{{}}},{{{}}},{},{}",
            values.join(", "),
            origins.join(", "),
            self.filter_only,
            self.filter_out
        )
    }
}
