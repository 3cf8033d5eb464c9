//! Variant orchestration.
//!
//! The [`Varianter`] owns one or more [`VariantSource`]s. The tree source
//! ([`MuxSource`]) loads documents, applies injected values and global
//! filters, and enumerates the multiplexed variants. A loaded dump replaces
//! all sources with a [`FrozenSource`] that replays the recorded variants.

use crate::config::{ConfigError, VarianterConfig};
use crate::filter::apply_filters;
use crate::loader::{LoaderError, create_from_yaml};
use crate::mux::{Leaf, MuxTree, Variant, generate_variant_id, is_empty_variant};
use crate::params::{Params, ParamsError};
use crate::tree::{Environment, Tree, TreeError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while producing variants.
#[derive(Error, Debug)]
pub enum VarianterError {
    #[error("dumping varianter state before parsing is not supported")]
    NotParsed,
    #[error("key:value pairs required in inject entry, found '{0}'")]
    InvalidInject(String),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("cannot access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One variant as handed to a test runner.
#[derive(Debug, Clone)]
pub struct VariantEntry {
    /// `None` only for the defaults-only variant.
    pub variant_id: Option<String>,
    pub variant: Variant,
    pub mux_path: Vec<String>,
}

impl VariantEntry {
    /// Parameter accessor for this variant.
    ///
    /// # Errors
    /// Returns `ParamsError::InvalidPattern` for an uncompilable `mux_path`.
    pub fn params(&self) -> Result<Params, ParamsError> {
        Params::new(&self.variant, &self.mux_path)
    }
}

/// Serialized leaf: its path and `(origin_path, key, value)` triples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafRecord {
    pub path: String,
    pub env: Vec<(String, String, Value)>,
}

/// Serialized variant, one element of a dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub variant_id: Option<String>,
    pub mux_path: Vec<String>,
    pub variant: Vec<LeafRecord>,
}

impl From<&VariantEntry> for VariantRecord {
    fn from(entry: &VariantEntry) -> Self {
        let variant = entry
            .variant
            .iter()
            .map(|leaf| LeafRecord {
                path: leaf.path.clone(),
                env: leaf
                    .environment
                    .iter()
                    .map(|e| (e.origin.clone(), e.key.clone(), e.value.clone()))
                    .collect(),
            })
            .collect();
        Self {
            variant_id: entry.variant_id.clone(),
            mux_path: entry.mux_path.clone(),
            variant,
        }
    }
}

impl From<VariantRecord> for VariantEntry {
    fn from(record: VariantRecord) -> Self {
        let variant = record
            .variant
            .into_iter()
            .map(|leaf| {
                let mut env = Environment::default();
                for (origin, key, value) in leaf.env {
                    env.set(&key, value, &origin);
                }
                Arc::new(Leaf::from_record(&leaf.path, env))
            })
            .collect();
        Self {
            variant_id: record.variant_id,
            variant,
            mux_path: record.mux_path,
        }
    }
}

/// A producer of variants plugged into the [`Varianter`].
pub trait VariantSource: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Prepare the source from configuration.
    ///
    /// # Errors
    /// Source specific; the tree source reports loader and inject errors.
    fn initialize(&mut self, _config: &VarianterConfig) -> Result<(), VarianterError> {
        Ok(())
    }

    /// Merge the default params tree under the source's own data.
    fn update_defaults(&mut self, _defaults: &Tree) {}

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn variants(&self) -> Box<dyn Iterator<Item = VariantEntry> + '_>;

    /// Human readable description; `summary` and `variants` are verbosity
    /// levels where 0 hides the section.
    fn to_str(&self, summary: u8, variants: u8, use_utf8: bool) -> String;
}

/// Split `[path:]key:value`. The value keeps its YAML scalar type when it
/// has one (`30` is an integer, `[1, 2]` a list), otherwise it stays a string.
///
/// # Errors
/// Returns `VarianterError::InvalidInject` when `key:value` is missing.
pub fn parse_inject(entry: &str) -> Result<(String, String, Value), VarianterError> {
    let fields: Vec<&str> = entry.splitn(3, ':').collect();
    let (path, key, raw) = match fields.as_slice() {
        [key, raw] => ("", *key, *raw),
        [path, key, raw] => (*path, *key, *raw),
        _ => return Err(VarianterError::InvalidInject(entry.to_string())),
    };
    Ok((path.to_string(), key.to_string(), inject_value(raw)))
}

fn inject_value(raw: &str) -> Value {
    match serde_yaml::from_str::<serde_yaml::Value>(raw) {
        Ok(
            serde_yaml::Value::Null
            | serde_yaml::Value::Mapping(_)
            | serde_yaml::Value::Tagged(_),
        )
        | Err(_) => Value::Str(raw.to_string()),
        Ok(parsed) => Value::from(parsed),
    }
}

/// Variants multiplexed from YAML documents and injected values.
#[derive(Debug, Default)]
pub struct MuxSource {
    root: Option<Tree>,
    mux_path: Vec<String>,
    variant_ids: Vec<String>,
    mux: Option<MuxTree>,
    count: usize,
}

impl MuxSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The filtered tree, without default params.
    #[must_use]
    pub const fn root(&self) -> Option<&Tree> {
        self.root.as_ref()
    }

    fn entries(&self) -> impl Iterator<Item = VariantEntry> + '_ {
        self.mux
            .iter()
            .flat_map(MuxTree::iter)
            .zip(&self.variant_ids)
            .map(|(variant, id)| VariantEntry {
                variant_id: Some(id.clone()),
                variant,
                mux_path: self.mux_path.clone(),
            })
    }
}

impl VariantSource for MuxSource {
    fn name(&self) -> &'static str {
        "yaml_to_mux"
    }

    fn initialize(&mut self, config: &VarianterConfig) -> Result<(), VarianterError> {
        let mut data = if config.files.is_empty() {
            None
        } else {
            Some(create_from_yaml(&config.files)?)
        };

        for inject in &config.mux_inject {
            let (path, key, value) = parse_inject(inject)?;
            let tree = data.get_or_insert_with(Tree::new);
            let root = tree.root();
            let id = tree.get_node(root, &path, true)?;
            tracing::debug!(path = %path, key = %key, value = %value, "injecting value");
            tree.node_mut(id).value.insert(key, value);
        }

        let Some(mut tree) = data else {
            return Ok(());
        };
        apply_filters(&mut tree, &config.mux_filter_only, &config.mux_filter_out);
        let mux = MuxTree::new(&tree);
        self.variant_ids = mux.iter().map(|v| generate_variant_id(&v)).collect();
        self.count = self.variant_ids.len();
        self.mux = Some(mux);
        self.mux_path.clone_from(&config.mux_path);
        self.root = Some(tree);
        Ok(())
    }

    fn update_defaults(&mut self, defaults: &Tree) {
        let Some(ref root) = self.root else {
            return;
        };
        let mut combination = defaults.clone();
        combination.merge_tree(root);
        self.mux = Some(MuxTree::new(&combination));
        self.count = self.entries().count();
    }

    fn len(&self) -> usize {
        self.count
    }

    fn variants(&self) -> Box<dyn Iterator<Item = VariantEntry> + '_> {
        Box::new(self.entries())
    }

    fn to_str(&self, summary: u8, variants: u8, use_utf8: bool) -> String {
        let Some(ref root) = self.root else {
            return String::new();
        };
        let mut out = Vec::new();
        if summary > 0 {
            out.push("Multiplex tree representation:".to_string());
            out.push(root.tree_view(root.root(), summary - 1, use_utf8));
            out.push(String::new());
        }
        if variants > 0 {
            out.push(format!("Multiplex variants ({}):", self.len()));
            for entry in self.entries() {
                out.extend(variant_to_str(&entry, variants - 1));
            }
        }
        out.join("\n")
    }
}

/// Replays variants from a dump.
#[derive(Debug, Clone, Default)]
pub struct FrozenSource {
    entries: Vec<VariantEntry>,
}

impl FrozenSource {
    #[must_use]
    pub fn new(records: Vec<VariantRecord>) -> Self {
        Self {
            entries: records.into_iter().map(VariantEntry::from).collect(),
        }
    }
}

impl VariantSource for FrozenSource {
    fn name(&self) -> &'static str {
        "frozen"
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn variants(&self) -> Box<dyn Iterator<Item = VariantEntry> + '_> {
        Box::new(self.entries.iter().cloned())
    }

    /// Loaded variants are always listed with their environments.
    fn to_str(&self, _summary: u8, _variants: u8, _use_utf8: bool) -> String {
        self.entries
            .iter()
            .flat_map(|entry| variant_to_str(entry, 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// `Variant <id>:    <paths>`; with `verbosity > 0` a leading blank line and
/// one sorted `origin:key => value` line per environment entry.
#[must_use]
pub fn variant_to_str(entry: &VariantEntry, verbosity: u8) -> Vec<String> {
    let paths = entry
        .variant
        .iter()
        .map(|leaf| leaf.path.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let id = entry.variant_id.as_deref().unwrap_or_default();
    let lead = if verbosity > 0 { "\n" } else { "" };
    let mut out = vec![format!("{lead}Variant {id}:    {paths}")];
    if verbosity == 0 {
        return out;
    }

    let env: BTreeSet<(String, String)> = entry
        .variant
        .iter()
        .flat_map(|leaf| leaf.environment.iter())
        .map(|e| (format!("{}:{}", e.origin, e.key), e.value.to_string()))
        .collect();
    let width = env.iter().map(|(key, _)| key.chars().count()).max().unwrap_or(0);
    for (key, value) in env {
        out.push(format!("    {key:<width$} => {value}"));
    }
    out
}

/// Produces test variants from the registered sources.
#[derive(Debug)]
pub struct Varianter {
    default_params: Vec<(String, Tree)>,
    defaults: Tree,
    sources: Vec<Box<dyn VariantSource>>,
    count: Option<usize>,
}

impl Default for Varianter {
    fn default() -> Self {
        Self::new()
    }
}

impl Varianter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_params: Vec::new(),
            defaults: Tree::new(),
            sources: vec![Box::new(MuxSource::new())],
            count: None,
        }
    }

    /// Varianter replaying a previous [`Varianter::dump`].
    #[must_use]
    pub fn from_state(state: Vec<VariantRecord>) -> Self {
        let mut varianter = Self::new();
        varianter.load(state);
        varianter
    }

    /// Register a default value on behalf of component `name`.
    ///
    /// Defaults sit under every variant (path `/` unless given) and never
    /// change variant ids.
    ///
    /// # Errors
    /// Propagates `TreeError` from node creation.
    pub fn add_default_param(
        &mut self,
        name: &str,
        key: &str,
        value: impl Into<Value>,
        path: Option<&str>,
    ) -> Result<(), VarianterError> {
        let index = match self.default_params.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.default_params.push((name.to_string(), Tree::new()));
                self.default_params.len() - 1
            }
        };
        let tree = &mut self.default_params[index].1;
        let root = tree.root();
        let id = tree.get_node(root, path.unwrap_or("/"), true)?;
        tree.node_mut(id).value.insert(key, value.into());
        Ok(())
    }

    /// Initialize every source from `config` and count the variants.
    ///
    /// With `load_path` set, the dump is replayed and nothing is parsed.
    /// With `dump_path` set, the variants are written there afterwards.
    ///
    /// # Errors
    /// Returns an error if documents cannot be loaded, an inject entry is
    /// malformed, or the dump cannot be read or written.
    pub fn parse(&mut self, config: &VarianterConfig) -> Result<(), VarianterError> {
        if let Some(ref path) = config.load_path {
            let content = std::fs::read_to_string(path).map_err(|source| VarianterError::Io {
                path: path.clone(),
                source,
            })?;
            let state: Vec<VariantRecord> = serde_json::from_str(&content)?;
            tracing::debug!(path = %path.display(), variants = state.len(), "loaded variants");
            self.load(state);
            return Ok(());
        }

        let mut defaults = Tree::new();
        for (_, tree) in &self.default_params {
            defaults.merge_tree(tree);
        }
        for source in &mut self.sources {
            source.initialize(config)?;
            source.update_defaults(&defaults);
            tracing::debug!(source = source.name(), variants = source.len(), "source initialized");
        }
        self.defaults = defaults;
        self.count = Some(self.sources.iter().map(|s| s.len()).sum());

        if let Some(ref path) = config.dump_path {
            let json = serde_json::to_string_pretty(&self.dump()?)?;
            std::fs::write(path, json).map_err(|source| VarianterError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn is_parsed(&self) -> bool {
        self.count.is_some()
    }

    /// Variants across all sources; 0 means only the defaults variant.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every variant of every source, or the single defaults variant when
    /// there are none.
    pub fn variants(&self) -> Box<dyn Iterator<Item = VariantEntry> + '_> {
        if self.is_empty() {
            return Box::new(std::iter::once(self.default_variant()));
        }
        Box::new(self.sources.iter().flat_map(|source| source.variants()))
    }

    fn default_variant(&self) -> VariantEntry {
        let root = self.defaults.root();
        let variant: Variant = self
            .defaults
            .leaves(root)
            .map(|id| Arc::new(Leaf::from_tree(&self.defaults, id)))
            .filter(|leaf| !is_empty_variant(std::slice::from_ref(leaf)))
            .collect();
        VariantEntry {
            variant_id: None,
            variant,
            mux_path: vec!["/run/*".to_string()],
        }
    }

    /// Tests to run when each of `tests` runs once per variant.
    #[must_use]
    pub fn number_of_tests(&self, tests: usize) -> usize {
        match self.count {
            Some(count) if count > 0 => tests * count,
            _ => tests,
        }
    }

    /// Lossy, replayable form of the yielded variants.
    ///
    /// # Errors
    /// Returns `VarianterError::NotParsed` before [`Varianter::parse`].
    pub fn dump(&self) -> Result<Vec<VariantRecord>, VarianterError> {
        if !self.is_parsed() {
            return Err(VarianterError::NotParsed);
        }
        Ok(self.variants().map(|entry| VariantRecord::from(&entry)).collect())
    }

    /// Replace all sources with the recorded variants.
    pub fn load(&mut self, state: Vec<VariantRecord>) {
        let source = FrozenSource::new(state);
        self.count = Some(source.len());
        self.sources = vec![Box::new(source)];
    }

    /// Human readable report; `summary` and `variants` are verbosity levels
    /// where 0 hides the section.
    #[must_use]
    pub fn to_str(&self, summary: u8, variants: u8, use_utf8: bool) -> String {
        if self.is_empty() {
            let mut out = Vec::new();
            if summary > 0 {
                out.push("No variants available, using defaults only".to_string());
            }
            if variants > 0 {
                let mut entry = self.default_variant();
                entry.variant_id = Some(String::new());
                out.push(variant_to_str(&entry, variants - 1).join("\n"));
            }
            return out.join("\n\n");
        }
        self.sources
            .iter()
            .map(|source| source.to_str(summary, variants, use_utf8))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
