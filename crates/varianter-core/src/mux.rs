//! Multiplexer: Cartesian product over multiplex domains.
//!
//! A [`MuxTree`] is a frozen snapshot of a [`Tree`]. Descending from the
//! root, every leaf becomes a single-entry pool and every node marked as
//! multiplex becomes a pool of nested domains (one per child). Variants are
//! the product of all pools, the first pool varying slowest.

use crate::tree::{Environment, FilterSet, NodeId, Tree};
use sha1::{Digest, Sha1};
use std::collections::VecDeque;
use std::sync::Arc;

/// Snapshot of one leaf: everything variants and parameter lookups need.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub name: String,
    pub path: String,
    pub environment: Environment,
    pub fingerprint: String,
}

impl Leaf {
    #[must_use]
    pub fn from_tree(tree: &Tree, id: NodeId) -> Self {
        Self {
            name: tree.name(id).to_string(),
            path: tree.path(id),
            environment: tree.environment(id),
            fingerprint: tree.fingerprint(id),
        }
    }

    /// Rebuild a leaf from a recorded path and environment.
    #[must_use]
    pub fn from_record(path: &str, environment: Environment) -> Self {
        let name = if path == "/" {
            String::new()
        } else {
            path.rsplit('/').next().unwrap_or_default().to_string()
        };
        let fingerprint = format!("{path}{environment},[]");
        Self {
            name,
            path: path.to_string(),
            environment,
            fingerprint,
        }
    }
}

/// Ordered leaves forming one point of the product.
pub type Variant = Vec<Arc<Leaf>>;

#[derive(Debug, Clone)]
enum Pool {
    Leaf(Arc<Leaf>),
    Mux(Vec<MuxTree>),
}

/// Variant generator over a frozen tree.
#[derive(Debug, Clone)]
pub struct MuxTree {
    pools: Vec<Pool>,
}

impl MuxTree {
    #[must_use]
    pub fn new(tree: &Tree) -> Self {
        Self::from_node(tree, tree.root())
    }

    fn from_node(tree: &Tree, id: NodeId) -> Self {
        let mut pools = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(node) = queue.pop_front() {
            if tree.is_leaf(node) {
                pools.push(Pool::Leaf(Arc::new(Leaf::from_tree(tree, node))));
            } else if tree.node(node).is_multiplex() {
                let domains = tree
                    .children(node)
                    .iter()
                    .map(|&child| Self::from_node(tree, child))
                    .collect();
                pools.push(Pool::Mux(domains));
            } else {
                for &child in tree.children(node).iter().rev() {
                    queue.push_front(child);
                }
            }
        }
        Self { pools }
    }

    /// Every combination, without filter validation.
    #[must_use]
    pub fn iter_variants(&self) -> Variants<'_> {
        Variants {
            cursors: self.pools.iter().map(Cursor::new).collect(),
            started: false,
            done: false,
        }
    }

    /// Combinations that pass [`is_valid_variant`]. Nested domains are
    /// enumerated unfiltered; validation happens once on the whole variant.
    pub fn iter(&self) -> impl Iterator<Item = Variant> + '_ {
        self.iter_variants().filter(|variant| is_valid_variant(variant))
    }
}

/// Position inside one pool. A multiplex pool walks its domains in order,
/// pulling each domain's variants from a nested [`Variants`].
#[derive(Debug)]
enum Cursor<'a> {
    Leaf(&'a Arc<Leaf>),
    Mux {
        domains: &'a [MuxTree],
        domain: usize,
        inner: Option<Variants<'a>>,
        current: Variant,
    },
}

impl<'a> Cursor<'a> {
    fn new(pool: &'a Pool) -> Self {
        match pool {
            Pool::Leaf(leaf) => Self::Leaf(leaf),
            Pool::Mux(domains) => Self::Mux {
                domains,
                domain: 0,
                inner: None,
                current: Vec::new(),
            },
        }
    }

    /// Back to the first alternative. False when the pool has none.
    fn reset(&mut self) -> bool {
        match self {
            Self::Leaf(_) => true,
            Self::Mux { domain, inner, .. } => {
                *domain = 0;
                *inner = None;
                self.advance()
            }
        }
    }

    /// Move to the next alternative. False once the pool is exhausted.
    fn advance(&mut self) -> bool {
        let Self::Mux {
            domains,
            domain,
            inner,
            current,
        } = self
        else {
            return false;
        };
        let domains: &'a [MuxTree] = *domains;
        while *domain < domains.len() {
            let variants = inner.get_or_insert_with(|| domains[*domain].iter_variants());
            if let Some(variant) = variants.next() {
                *current = variant;
                return true;
            }
            *domain += 1;
            *inner = None;
        }
        false
    }

    fn leaves(&self) -> &[Arc<Leaf>] {
        match self {
            Self::Leaf(leaf) => std::slice::from_ref(*leaf),
            Self::Mux { current, .. } => current.as_slice(),
        }
    }
}

/// Lazy odometer over pools, last pool fastest. Nested multiplex domains
/// are generated on demand as well.
#[derive(Debug)]
pub struct Variants<'a> {
    cursors: Vec<Cursor<'a>>,
    started: bool,
    done: bool,
}

impl Variants<'_> {
    fn step(&mut self) -> bool {
        if !self.started {
            self.started = true;
            return self.cursors.iter_mut().all(Cursor::reset);
        }
        for position in (0..self.cursors.len()).rev() {
            if self.cursors[position].advance() {
                return true;
            }
            if !self.cursors[position].reset() {
                return false;
            }
        }
        false
    }
}

impl Iterator for Variants<'_> {
    type Item = Variant;

    fn next(&mut self) -> Option<Variant> {
        if self.done {
            return None;
        }
        if !self.step() {
            self.done = true;
            return None;
        }
        Some(
            self.cursors
                .iter()
                .flat_map(|cursor| cursor.leaves().iter().cloned())
                .collect(),
        )
    }
}

/// `"/a/b/"` for `"/a/b/c/"`: the prefix shared by siblings.
fn parent_prefix(path: &str) -> String {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let head = trimmed.rsplit_once('/').map_or(trimmed, |(head, _)| head);
    format!("{head}/")
}

/// Check a variant against the filters inherited by its leaves.
///
/// Rejected when any leaf lies under a `filter_out` entry, or when a leaf
/// sits below the parent of some `filter_only` entry without matching it and
/// no entry at the same or a deeper level allows the leaf.
#[must_use]
pub fn is_valid_variant(variant: &[Arc<Leaf>]) -> bool {
    let mut only = FilterSet::default();
    let mut out = FilterSet::default();
    for leaf in variant {
        only.extend(&leaf.environment.filter_only);
        out.extend(&leaf.environment.filter_out);
    }
    if only.is_empty() && out.is_empty() {
        return true;
    }

    for prefix in out.iter() {
        if variant
            .iter()
            .any(|leaf| format!("{}/", leaf.path).starts_with(prefix))
        {
            return false;
        }
    }

    let only: Vec<(&str, String, usize)> = only
        .iter()
        .map(|entry| (entry, parent_prefix(entry), entry.matches('/').count()))
        .collect();
    for leaf in variant {
        let path = format!("{}/", leaf.path);
        let leaf_parent = parent_prefix(&path);
        let (mut keep, mut remove) = (0, 0);
        for (entry, entry_parent, level) in &only {
            if *level < keep.max(remove) {
                continue;
            }
            if leaf_parent.starts_with(entry_parent.as_str()) {
                if path.starts_with(entry) {
                    keep = *level;
                } else {
                    remove = *level;
                }
            }
        }
        if remove > keep {
            return false;
        }
    }
    true
}

/// Stable id: leaf names sorted by path, then the first four hex digits of
/// the SHA-1 of their joined fingerprints.
#[must_use]
pub fn generate_variant_id(variant: &[Arc<Leaf>]) -> String {
    let mut sorted: Vec<&Arc<Leaf>> = variant.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let fingerprint = sorted
        .iter()
        .map(|leaf| leaf.fingerprint.as_str())
        .collect::<Vec<_>>()
        .join("-");
    let digest = Sha1::digest(fingerprint.as_bytes());
    let hex: String = digest.iter().take(2).map(|b| format!("{b:02x}")).collect();

    let names = sorted
        .iter()
        .map(|leaf| leaf.name.as_str())
        .collect::<Vec<_>>()
        .join("-");
    format!("{names}-{hex}")
}

/// True when the variant carries no data at all.
#[must_use]
pub fn is_empty_variant(variant: &[Arc<Leaf>]) -> bool {
    variant
        .iter()
        .all(|leaf| leaf.name.is_empty() && leaf.environment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    fn paths(variant: &Variant) -> Vec<&str> {
        variant.iter().map(|leaf| leaf.path.as_str()).collect()
    }

    /// `/a(mux)/{first,second,third}`, `/b(mux)/{one,two}`
    fn two_domains(root_filter: Option<&str>) -> Tree {
        let mut root = Node::default();
        if let Some(filter) = root_filter {
            root = root.with_filter_only(filter);
        }
        let mut tree = Tree::with_root(root);
        let top = tree.root();
        let a = tree.add_child(top, Node::new("a").with_multiplex(true));
        for name in ["first", "second", "third"] {
            tree.add_child(a, Node::new(name).with_value("name", name));
        }
        let b = tree.add_child(top, Node::new("b").with_multiplex(true));
        for name in ["one", "two"] {
            tree.add_child(b, Node::new(name).with_value("name", name));
        }
        tree
    }

    fn leaf(path: &str, only: &[&str], out: &[&str]) -> Arc<Leaf> {
        let mut env = Environment::default();
        for entry in only {
            env.filter_only.insert(entry);
        }
        for entry in out {
            env.filter_out.insert(entry);
        }
        Arc::new(Leaf::from_record(path, env))
    }

    #[test]
    fn test_single_domain() {
        let mut tree = Tree::new();
        let hw = tree.add_child(tree.root(), Node::new("hw").with_multiplex(true));
        tree.add_child(hw, Node::new("cpu").with_value("arch", "x86"));
        tree.add_child(hw, Node::new("gpu").with_value("vendor", "nvidia"));

        let variants: Vec<Variant> = MuxTree::new(&tree).iter().collect();
        assert_eq!(variants.len(), 2);
        assert_eq!(paths(&variants[0]), ["/hw/cpu"]);
        assert_eq!(paths(&variants[1]), ["/hw/gpu"]);
    }

    #[test]
    fn test_product_order_first_pool_slowest() {
        let tree = two_domains(None);
        let variants: Vec<Vec<String>> = MuxTree::new(&tree)
            .iter()
            .map(|v| v.iter().map(|leaf| leaf.name.clone()).collect())
            .collect();
        assert_eq!(
            variants,
            [
                ["first", "one"],
                ["first", "two"],
                ["second", "one"],
                ["second", "two"],
                ["third", "one"],
                ["third", "two"],
            ]
        );
    }

    #[test]
    fn test_cartesian_completeness_nested() {
        // /x(mux)/{p(mux)/{p1,p2}, q}, plus a plain leaf /z
        let mut tree = Tree::new();
        let root = tree.root();
        let x = tree.add_child(root, Node::new("x").with_multiplex(true));
        let p = tree.add_child(x, Node::new("p").with_multiplex(true));
        tree.add_child(p, Node::new("p1"));
        tree.add_child(p, Node::new("p2"));
        tree.add_child(x, Node::new("q"));
        tree.add_child(root, Node::new("z"));

        let variants: Vec<Variant> = MuxTree::new(&tree).iter().collect();
        let all: Vec<Vec<&str>> = variants.iter().map(paths).collect();
        assert_eq!(
            all,
            [
                vec!["/x/p/p1", "/z"],
                vec!["/x/p/p2", "/z"],
                vec!["/x/q", "/z"],
            ]
        );
    }

    #[test]
    fn test_nested_domains_are_generated_on_demand() {
        // /outer(mux)/{wide/{p0..p39(mux)/{a,b}}, narrow}: 2^40 + 1 variants
        let mut tree = Tree::new();
        let root = tree.root();
        let outer = tree.add_child(root, Node::new("outer").with_multiplex(true));
        let wide = tree.add_child(outer, Node::new("wide"));
        for index in 0..40 {
            let pool = tree.add_child(wide, Node::new(format!("p{index}")).with_multiplex(true));
            tree.add_child(pool, Node::new("a"));
            tree.add_child(pool, Node::new("b"));
        }
        tree.add_child(outer, Node::new("narrow"));

        let mux = MuxTree::new(&tree);
        let first: Vec<Variant> = mux.iter_variants().take(2).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].len(), 40);
        assert!(first[0].iter().all(|leaf| leaf.name == "a"));
        assert_eq!(first[1][39].path, "/outer/wide/p39/b");
        assert_eq!(first[1][38].path, "/outer/wide/p38/a");
    }

    #[test]
    fn test_non_mux_leaves_concatenate() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.add_child(root, Node::new("a"));
        tree.add_child(a, Node::new("b"));
        tree.add_child(a, Node::new("c"));
        let variants: Vec<Variant> = MuxTree::new(&tree).iter().collect();
        assert_eq!(variants.len(), 1);
        assert_eq!(paths(&variants[0]), ["/a/b", "/a/c"]);
    }

    #[test]
    fn test_root_only_tree_yields_root() {
        let tree = Tree::new();
        let variants: Vec<Variant> = MuxTree::new(&tree).iter().collect();
        assert_eq!(variants.len(), 1);
        assert_eq!(paths(&variants[0]), ["/"]);
        assert!(is_empty_variant(&variants[0]));
    }

    #[test]
    fn test_root_filter_only() {
        let tree = two_domains(Some("/a/second"));
        let variants: Vec<Variant> = MuxTree::new(&tree).iter().collect();
        assert_eq!(variants.len(), 2);
        for variant in &variants {
            assert_eq!(variant[0].path, "/a/second");
        }
        // unfiltered enumeration still sees everything
        assert_eq!(MuxTree::new(&tree).iter_variants().count(), 6);
    }

    #[test]
    fn test_leaf_filters_prune_product() {
        let mut tree = two_domains(None);
        let root = tree.root();
        let first = tree.find_node(root, "a/first");
        if let Some(first) = first {
            tree.node_mut(first).filters.add_out("/b/two");
        }
        let variants: Vec<Variant> = MuxTree::new(&tree).iter().collect();
        assert_eq!(variants.len(), 5);
        assert!(
            variants
                .iter()
                .all(|v| !(v[0].name == "first" && v[1].name == "two"))
        );
    }

    #[test]
    fn test_valid_variant_filter_out() {
        let variant = vec![leaf("/foo/bar", &[], &["/foo"]), leaf("/baz", &[], &[])];
        assert!(!is_valid_variant(&variant));
        let variant = vec![leaf("/foobar", &[], &["/foo"])];
        assert!(is_valid_variant(&variant));
    }

    #[test]
    fn test_valid_variant_filter_only() {
        let only = ["/a/b", "/c/d"];
        assert!(is_valid_variant(&[leaf("/a/b", &only, &[]), leaf("/c/d/e", &[], &[])]));
        assert!(!is_valid_variant(&[leaf("/a/x", &only, &[])]));
        // unrelated branches are not affected
        assert!(is_valid_variant(&[leaf("/x/y", &only, &[])]));
        // two allowed siblings
        let siblings = ["/a/b", "/a/c"];
        assert!(is_valid_variant(&[leaf("/a/c", &siblings, &[])]));
    }

    #[test]
    fn test_valid_variant_levels() {
        assert!(is_valid_variant(&[]));
        assert!(is_valid_variant(&[leaf("/foo", &["/foo/"], &[])]));
        assert!(!is_valid_variant(&[leaf("/foo", &["/foo"], &["/foo"])]));
        assert!(is_valid_variant(&[leaf("/1/foo", &[], &[]), leaf("/1/bar", &["/1"], &[])]));
        assert!(!is_valid_variant(&[
            leaf("/1/foo", &["/1/foo"], &[]),
            leaf("/1/bar", &["/1"], &[]),
        ]));
        assert!(is_valid_variant(&[
            leaf("/1/foo", &["/1/foo", "/1/bar"], &[]),
            leaf("/1/bar", &["/1"], &[]),
        ]));
        assert!(is_valid_variant(&[leaf("/1/1/foo", &["/1/1/foo", "/1", "/1/1"], &[])]));
    }

    #[test]
    fn test_valid_variant_malformed_filters() {
        assert!(is_valid_variant(&[leaf("/foo", &["bar"], &[])]));
        assert!(is_valid_variant(&[leaf("/foo", &[], &["foo"])]));
        assert!(is_valid_variant(&[leaf("/foo", &[], &["//foo"])]));
        assert!(is_valid_variant(&[leaf("/foo", &["//foo"], &[])]));
    }

    #[test]
    fn test_variant_id_is_stable_and_sorted() {
        let tree = two_domains(None);
        let ids: Vec<String> = MuxTree::new(&tree)
            .iter()
            .map(|v| generate_variant_id(&v))
            .collect();
        let again: Vec<String> = MuxTree::new(&tree.clone())
            .iter()
            .map(|v| generate_variant_id(&v))
            .collect();
        assert_eq!(ids, again);
        assert!(ids[0].starts_with("first-one-"));
        assert_eq!(ids[0].len(), "first-one-".len() + 4);

        let variant = MuxTree::new(&tree).iter().next().unwrap_or_default();
        let reversed: Variant = variant.iter().rev().cloned().collect();
        assert_eq!(generate_variant_id(&variant), generate_variant_id(&reversed));
    }

    #[test]
    fn test_variant_id_depends_on_values() -> Result<(), Box<dyn std::error::Error>> {
        let tree = two_domains(None);
        let mut changed = tree.clone();
        let one = changed
            .find_node(changed.root(), "b/one")
            .ok_or("missing node")?;
        changed.node_mut(one).value.insert("name", "uno".into());

        let before = MuxTree::new(&tree).iter().next().unwrap_or_default();
        let after = MuxTree::new(&changed).iter().next().unwrap_or_default();
        assert_ne!(generate_variant_id(&before), generate_variant_id(&after));
        Ok(())
    }
}
