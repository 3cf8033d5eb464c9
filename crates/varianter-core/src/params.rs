//! Parameter accessor bound to a single variant.
//!
//! Leaves of the variant are split into scopes: one per `mux_path` pattern
//! (relative scopes, greedy left to right) plus an absolute scope holding
//! whatever is left. Relative queries only see relative scopes; absolute
//! queries fall back to the absolute scope.

use crate::mux::Leaf;
use crate::value::Value;
use regex::Regex;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while resolving parameters.
#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("multiple leaves matching '{path}' contain the key '{key}': {}", entries.join(", "))]
    Clash {
        key: String,
        path: String,
        /// `origin_path=>value` for every conflicting leaf.
        entries: Vec<String>,
    },
    #[error("invalid path pattern '{path}': {source}")]
    InvalidPattern {
        path: String,
        #[source]
        source: regex::Error,
    },
}

/// Compiled lookup path.
///
/// `*` stands for one path segment, except at the very end where it
/// matches anything. Patterns starting with `/` are absolute; others match
/// anywhere inside a leaf path.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    /// # Errors
    /// Returns `ParamsError::InvalidPattern` if the regex cannot be built.
    pub fn compile(path: &str) -> Result<Self, ParamsError> {
        let expression = if path.is_empty() {
            "^$".to_string()
        } else if path == "/" {
            "/".to_string()
        } else {
            let (body, suffix) = path
                .strip_suffix('*')
                .map_or((path, "$"), |body| (body, ".*"));
            let escaped: Vec<String> = body.split('*').map(regex::escape).collect();
            format!("{}{suffix}", escaped.join("[^/]*"))
        };
        let regex = Regex::new(&expression).map_err(|source| ParamsError::InvalidPattern {
            path: path.to_string(),
            source,
        })?;
        Ok(Self {
            source: path.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.source.starts_with('/')
    }

    /// Does this pattern address the leaf at `leaf_path`?
    ///
    /// Without the trailing `/` a match must start on a segment boundary,
    /// so `net` addresses `/run/net` but not `/run/ethernet`.
    #[must_use]
    pub fn matches(&self, leaf_path: &str) -> bool {
        if self.regex.is_match(&format!("{leaf_path}/")) {
            return true;
        }
        std::iter::once(0)
            .chain(leaf_path.match_indices('/').map(|(index, _)| index + 1))
            .any(|start| {
                self.regex
                    .find_at(leaf_path, start)
                    .is_some_and(|m| m.start() == start)
            })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn as_regex(&self) -> &str {
        self.regex.as_str()
    }
}

enum Lookup {
    NoMatch,
    Found(Value),
}

/// A named slice of a variant's leaves.
#[derive(Debug, Clone)]
pub struct ParamScope {
    name: String,
    leaves: Vec<Arc<Leaf>>,
}

impl ParamScope {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn leaves(&self) -> &[Arc<Leaf>] {
        &self.leaves
    }

    fn lookup_or_fail(&self, pattern: &PathPattern, key: &str) -> Result<Lookup, ParamsError> {
        let found: Vec<(&Value, &str)> = self
            .leaves
            .iter()
            .filter(|leaf| pattern.matches(&leaf.path))
            .filter_map(|leaf| {
                leaf.environment
                    .entry(key)
                    .map(|entry| (&entry.value, entry.origin.as_str()))
            })
            .collect();

        let Some(&(first, origin)) = found.first() else {
            return Ok(Lookup::NoMatch);
        };
        if found.iter().all(|&(_, other)| other == origin) {
            return Ok(Lookup::Found(first.clone()));
        }
        Err(ParamsError::Clash {
            key: key.to_string(),
            path: pattern.as_str().to_string(),
            entries: found
                .iter()
                .map(|(value, origin)| format!("{origin}=>{value}"))
                .collect(),
        })
    }

    fn items(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.leaves.iter().flat_map(|leaf| {
            leaf.environment
                .iter()
                .map(|entry| (entry.origin.as_str(), entry.key.as_str(), &entry.value))
        })
    }
}

impl fmt::Display for ParamScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<String> = self
            .leaves
            .iter()
            .map(|leaf| format!("'{}/'", leaf.path))
            .collect();
        write!(f, "{} ([{}])", self.name, paths.join(", "))
    }
}

type CacheKey = (String, String, String);

/// Parameters of one variant.
#[derive(Debug)]
pub struct Params {
    relative: Vec<ParamScope>,
    absolute: ParamScope,
    cache: RefCell<HashMap<CacheKey, Value>>,
}

impl Params {
    /// Partition `leaves` by `mux_path`.
    ///
    /// # Errors
    /// Returns `ParamsError::InvalidPattern` for an uncompilable entry.
    pub fn new(leaves: &[Arc<Leaf>], mux_path: &[String]) -> Result<Self, ParamsError> {
        let mut remaining: Vec<Arc<Leaf>> = leaves.to_vec();
        let mut relative = Vec::with_capacity(mux_path.len());
        for (index, path) in mux_path.iter().enumerate() {
            let pattern = PathPattern::compile(path)?;
            let (matched, rest): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|leaf| pattern.matches(&leaf.path));
            remaining = rest;
            relative.push(ParamScope {
                name: format!("{index}: {path}"),
                leaves: matched,
            });
        }
        Ok(Self {
            relative,
            absolute: ParamScope {
                name: "*: *".to_string(),
                leaves: remaining,
            },
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// Resolve `key` under `path` (any relative path when `None`).
    ///
    /// Relative scopes are tried in order and the first match wins. Absolute
    /// paths additionally try the absolute scope. `default` is returned when
    /// nothing matches.
    ///
    /// # Errors
    /// Returns `ParamsError::Clash` when matching leaves inherit the key from
    /// more than one origin, even if the values are equal.
    pub fn get(
        &self,
        key: &str,
        path: Option<&str>,
        default: impl Into<Value>,
    ) -> Result<Value, ParamsError> {
        let path = path.unwrap_or("*");
        let default = default.into();
        let cache_key = default
            .cache_key()
            .map(|repr| (key.to_string(), path.to_string(), repr));
        if let Some(ref cache_key) = cache_key {
            if let Some(value) = self.cache.borrow().get(cache_key) {
                return Ok(value.clone());
            }
        }

        let value = self.resolve(key, path, &default)?;
        tracing::debug!("PARAMS (key={key}, path={path}, default={default}) => {value}");
        if let Some(cache_key) = cache_key {
            self.cache.borrow_mut().insert(cache_key, value.clone());
        }
        Ok(value)
    }

    fn resolve(&self, key: &str, path: &str, default: &Value) -> Result<Value, ParamsError> {
        let pattern = PathPattern::compile(path)?;
        for scope in &self.relative {
            if let Lookup::Found(value) = scope.lookup_or_fail(&pattern, key)? {
                return Ok(value);
            }
        }
        if pattern.is_absolute() {
            if let Lookup::Found(value) = self.absolute.lookup_or_fail(&pattern, key)? {
                return Ok(value);
            }
        }
        Ok(default.clone())
    }

    /// Whitespace-separated names stored under `key`.
    ///
    /// # Errors
    /// Propagates `ParamsError::Clash` from [`Params::get`].
    pub fn objects(&self, key: &str, path: Option<&str>) -> Result<Vec<String>, ParamsError> {
        let value = self.get(key, path, "")?;
        let names = match value {
            Value::Str(s) => s.split_whitespace().map(str::to_string).collect(),
            Value::List(items) => items.iter().map(ToString::to_string).collect(),
            Value::Null => Vec::new(),
            other => other
                .to_string()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        };
        Ok(names)
    }

    /// Every `(origin_path, key, value)` visible in the variant, each
    /// `(origin_path, key)` once. Relative scopes come first.
    #[must_use]
    pub fn iter_items(&self) -> Vec<(String, String, Value)> {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut out = Vec::new();
        for scope in self.relative.iter().chain(std::iter::once(&self.absolute)) {
            for (origin, key, value) in scope.items() {
                if seen.insert((origin, key)) {
                    out.push((origin.to_string(), key.to_string(), value.clone()));
                }
            }
        }
        out
    }

    /// Relative scopes in `mux_path` order.
    #[must_use]
    pub fn relative_scopes(&self) -> &[ParamScope] {
        &self.relative
    }

    #[must_use]
    pub const fn absolute_scope(&self) -> &ParamScope {
        &self.absolute
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "params {{{}", self.absolute)?;
        for scope in &self.relative {
            write!(f, ",{scope}")?;
        }
        write!(f, "}}")
    }
}
