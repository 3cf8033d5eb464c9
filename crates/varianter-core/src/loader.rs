//! YAML document loader.
//!
//! Every document becomes a subtree (under `/run` unless the reference
//! carries a `using:` prefix) and documents are merged in order.
//!
//! Untagged mappings and empty values become nodes, everything else becomes
//! a node value. Tags drive the rest:
//!
//! | Tag | Effect |
//! |---|---|
//! | `!mux` | marks the node as a multiplex domain |
//! | `!include : file` | merges another document into this node |
//! | `!using : a/b` | re-roots the node under `a/b` |
//! | `!remove_node : regex` | drops matching children of the node it is merged into |
//! | `!remove_value : regex` | drops matching values of the node it is merged into |
//! | `!filter-only : path` | node-level filter-only |
//! | `!filter-out : path` | node-level filter-out |
//! | `!!python/dict` | keeps a mapping as a plain value |

use crate::control::Control;
use crate::tree::{Node, Tree, TreeError};
use crate::value::{Value, yaml_key_to_string};
use serde_yaml::Value as Yaml;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading documents.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid multiplex file '{document}': {message}")]
    Parse { document: String, message: String },
    #[error("invalid control in '{document}': {message}")]
    InvalidControl { document: String, message: String },
    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

const MAPPING_HINT: &str = "mapping values are not allowed";

/// Load and merge `references` (`[using:]path`) into a single tree.
///
/// # Errors
/// Returns an error if a document cannot be read or parsed, or if it
/// misuses a control tag.
pub fn create_from_yaml(references: &[String]) -> Result<Tree, LoaderError> {
    let mut tree = Tree::new();
    for reference in expand_references(references)? {
        let (prefix, path) = split_reference(&reference);
        tracing::debug!(document = %path, prefix = ?prefix, "loading document");
        if let Some(document) = load_document(Path::new(&path), &prefix, &[])? {
            tree.merge_tree(&document);
        }
    }
    Ok(tree)
}

/// Expand glob patterns in the path part of each reference. Matches are
/// sorted; a pattern without matches is kept verbatim so that reading it
/// reports the missing file.
fn expand_references(references: &[String]) -> Result<Vec<String>, LoaderError> {
    let mut out = Vec::new();
    for reference in references {
        let (head, path) = match find_separator(reference) {
            Some(index) => (&reference[..=index], &reference[index + 1..]),
            None => ("", reference.as_str()),
        };
        if !path.contains(['*', '?', '[']) {
            out.push(reference.clone());
            continue;
        }
        let matches: BTreeSet<String> = glob::glob(path)?
            .filter_map(Result::ok)
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        if matches.is_empty() {
            tracing::warn!(pattern = %path, "glob matched no documents");
            out.push(reference.clone());
        } else {
            out.extend(matches.into_iter().map(|m| format!("{head}{m}")));
        }
    }
    Ok(out)
}

/// Index of the first `:` not escaped by a backslash.
fn find_separator(reference: &str) -> Option<usize> {
    let bytes = reference.as_bytes();
    (0..bytes.len()).find(|&i| bytes[i] == b':' && (i == 0 || bytes[i - 1] != b'\\'))
}

/// Split `[using:]path` into the prefix segments and the document path.
///
/// Without a prefix the document lands in `/run`; a relative prefix is
/// placed below `/run`; an absolute one is used as-is.
#[must_use]
pub fn split_reference(reference: &str) -> (Vec<String>, String) {
    let unescape = |s: &str| s.replace("\\:", ":");
    let Some(index) = find_separator(reference) else {
        return (vec!["run".to_string()], unescape(reference));
    };
    let head = unescape(&reference[..index]);
    let path = unescape(&reference[index + 1..]);
    let mut prefix: Vec<String> = head
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if !head.starts_with('/') {
        prefix.insert(0, "run".to_string());
    }
    (prefix, path)
}

/// Load one document and place it under `prefix`. Empty documents yield
/// `None`. `loading` holds the canonical paths of the documents whose
/// includes led here.
fn load_document(
    path: &Path,
    prefix: &[String],
    loading: &[PathBuf],
) -> Result<Option<Tree>, LoaderError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let yaml: Yaml = serde_yaml::from_str(&content).map_err(|e| {
        let mut message = e.to_string();
        if message.contains(MAPPING_HINT) {
            message.push_str("\nMake sure !tags and colons are separated by a space (eg. !include :)");
        }
        LoaderError::Parse {
            document: path.display().to_string(),
            message,
        }
    })?;
    if yaml.is_null() {
        return Ok(None);
    }

    let mut chain = loading.to_vec();
    chain.push(canonical(path));
    let parser = DocumentParser {
        path,
        loading: chain,
    };
    let body = parser.parse_node("", yaml)?;
    if prefix.is_empty() {
        return Ok(Some(body));
    }
    let mut tree = Tree::new();
    let root = tree.root();
    let target = tree.get_node(root, &prefix.join("/"), true)?;
    tree.merge(target, &body, body.root());
    Ok(Some(tree))
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn tag_name(tag: &serde_yaml::value::Tag) -> String {
    tag.to_string().trim_start_matches('!').to_string()
}

fn scalar_to_string(value: &Yaml) -> String {
    match value {
        Yaml::String(s) => s.clone(),
        Yaml::Null => String::new(),
        other => yaml_key_to_string(other),
    }
}

/// End `path` with exactly one `/`; `None` for an empty path.
fn normalize_filter(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    if path.ends_with('/') {
        Some(path.to_string())
    } else {
        Some(format!("{path}/"))
    }
}

struct DocumentParser<'a> {
    path: &'a Path,
    loading: Vec<PathBuf>,
}

impl DocumentParser<'_> {
    fn document(&self) -> String {
        self.path.display().to_string()
    }

    fn invalid(&self, message: String) -> LoaderError {
        LoaderError::InvalidControl {
            document: self.document(),
            message,
        }
    }

    /// Build a tree whose root is the node `name` holding `content`.
    fn parse_node(&self, name: &str, content: Yaml) -> Result<Tree, LoaderError> {
        let mut tree = Tree::with_root(Node::new(name));
        let content = match content {
            Yaml::Tagged(tagged) if tag_name(&tagged.tag) == "mux" => {
                tree.node_mut(tree.root()).multiplex = Some(true);
                tagged.value
            }
            other => other,
        };

        let mut using: Option<String> = None;
        match content {
            Yaml::Mapping(mapping) => {
                for (key, value) in mapping {
                    self.parse_entry(&mut tree, &mut using, key, value)?;
                }
            }
            Yaml::Null => {}
            Yaml::String(s) if s.is_empty() => {}
            other => {
                return Err(LoaderError::Parse {
                    document: self.document(),
                    message: format!(
                        "node '{name}' must be a mapping, found {}",
                        Value::from(other)
                    ),
                });
            }
        }

        match using {
            Some(using) => Ok(Self::apply_using(name, &using, tree)),
            None => Ok(tree),
        }
    }

    fn parse_entry(
        &self,
        tree: &mut Tree,
        using: &mut Option<String>,
        key: Yaml,
        value: Yaml,
    ) -> Result<(), LoaderError> {
        let root = tree.root();
        if let Yaml::Tagged(tagged) = key {
            return self.parse_control(tree, using, &tag_name(&tagged.tag), &value);
        }

        let key = yaml_key_to_string(&key);
        match value {
            Yaml::Null | Yaml::Mapping(_) => {
                let child = self.parse_node(&key, value)?;
                tree.graft(root, &child);
            }
            Yaml::Tagged(tagged) if tag_name(&tagged.tag) == "mux" => {
                let child = self.parse_node(&key, Yaml::Tagged(tagged))?;
                tree.graft(root, &child);
            }
            Yaml::Tagged(tagged) if tag_name(&tagged.tag).ends_with("python/dict") => {
                tree.node_mut(root).value.insert(key, Value::from(tagged.value));
            }
            other => {
                tree.node_mut(root).value.insert(key, Value::from(other));
            }
        }
        Ok(())
    }

    fn parse_control(
        &self,
        tree: &mut Tree,
        using: &mut Option<String>,
        tag: &str,
        value: &Yaml,
    ) -> Result<(), LoaderError> {
        let root = tree.root();
        let argument = scalar_to_string(value);
        match tag {
            "include" => {
                let included = self.resolve_include(&argument)?;
                if self.loading.contains(&canonical(&included)) {
                    return Err(self.invalid(format!(
                        "recursive include of '{}'",
                        included.display()
                    )));
                }
                if let Some(document) = load_document(&included, &[], &self.loading)? {
                    tree.merge_tree(&document);
                }
            }
            "using" => {
                if using.is_some() {
                    return Err(self.invalid(format!(
                        "!using can be used only once per node ('{}')",
                        tree.name(root)
                    )));
                }
                let trimmed = argument.strip_prefix('/').unwrap_or(&argument);
                let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
                *using = Some(trimmed.to_string());
            }
            "remove_node" => {
                let control =
                    Control::remove_node(&argument).map_err(|e| self.invalid(e.to_string()))?;
                tree.node_mut(root).control.push(control);
            }
            "remove_value" => {
                let control =
                    Control::remove_value(&argument).map_err(|e| self.invalid(e.to_string()))?;
                tree.node_mut(root).control.push(control);
            }
            "mux" => tree.node_mut(root).multiplex = Some(true),
            "filter-only" | "filter_only" => {
                if let Some(path) = normalize_filter(&argument) {
                    tree.node_mut(root).filters.add_only(path);
                }
            }
            "filter-out" | "filter_out" => {
                if let Some(path) = normalize_filter(&argument) {
                    tree.node_mut(root).filters.add_out(path);
                }
            }
            other => return Err(self.invalid(format!("unknown tag '!{other}'"))),
        }
        Ok(())
    }

    /// Included paths are relative to the including document.
    fn resolve_include(&self, target: &str) -> Result<PathBuf, LoaderError> {
        let target = Path::new(target);
        let resolved = if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(target)
        };
        if !resolved.exists() {
            return Err(self.invalid(format!(
                "file '{}' included from '{}' does not exist",
                resolved.display(),
                self.document()
            )));
        }
        Ok(resolved)
    }

    /// Re-root `tree` under `using`. A named node keeps its name and gets
    /// the `using` segments as new ancestors; the document root is merged
    /// into the node at `using` instead.
    fn apply_using(name: &str, using: &str, tree: Tree) -> Tree {
        let segments: Vec<&str> = using.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return tree;
        }
        if name.is_empty() {
            let mut wrapped = Tree::new();
            let mut target = wrapped.root();
            for segment in segments {
                target = wrapped.add_child(target, Node::new(segment));
            }
            wrapped.merge(target, &tree, tree.root());
            return wrapped;
        }
        let mut wrapped = Tree::with_root(Node::new(segments[0]));
        let mut target = wrapped.root();
        for segment in &segments[1..] {
            target = wrapped.add_child(target, Node::new(*segment));
        }
        wrapped.graft(target, &tree);
        wrapped
    }
}
