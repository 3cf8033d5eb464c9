//! Global `filter_only` / `filter_out` application on a merged tree.

use crate::tree::{NodeId, Tree};
use std::collections::HashSet;

/// Parent portion of a path: everything before the last `/`, or `/` when
/// that is empty.
#[must_use]
pub fn path_parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) if index > 0 => &path[..index],
        _ => "/",
    }
}

fn normalize(filters: &[String], kind: &str) -> Vec<String> {
    filters
        .iter()
        .filter_map(|path| {
            if path.is_empty() {
                tracing::warn!(kind, "ignoring empty filter");
                return None;
            }
            Some(path.strip_suffix('/').unwrap_or(path).to_string())
        })
        .filter(|path| !path.is_empty())
        .collect()
}

/// Detach every node rejected by the filters, walking preorder from the root.
///
/// A node survives `filter_only` when its path equals one of the entries, or
/// when no entry names a sibling of it. An exact `filter_out` match always
/// detaches, even if `filter_only` named the same path.
pub fn apply_filters(tree: &mut Tree, filter_only: &[String], filter_out: &[String]) {
    let only = normalize(filter_only, "filter_only");
    let out = normalize(filter_out, "filter_out");
    if only.is_empty() && out.is_empty() {
        return;
    }

    let order: Vec<NodeId> = tree.preorder(tree.root()).collect();
    let mut removed: HashSet<NodeId> = HashSet::new();
    for id in order {
        let Some(parent) = tree.parent(id) else {
            continue;
        };
        if removed.contains(&parent) {
            removed.insert(id);
            continue;
        }
        let path = tree.path(id);
        let parent_path = tree.path(parent);

        let mut keep = true;
        for entry in &only {
            if *entry == path {
                keep = true;
                break;
            }
            if path_parent(entry) == parent_path {
                keep = false;
            }
        }
        if out.iter().any(|entry| *entry == path) {
            keep = false;
        }

        if !keep {
            tracing::debug!(node = %path, "filtered out");
            tree.detach(id);
            removed.insert(id);
        }
    }
}
