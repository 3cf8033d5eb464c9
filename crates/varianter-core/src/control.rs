//! Control entries: deferred structural edits attached to nodes.

use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Errors raised while building control entries.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A regular expression that must match a whole node or key name.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    /// Compile `pattern`, anchored on both ends.
    ///
    /// # Errors
    /// Returns `ControlError::InvalidPattern` if `pattern` is not a valid regex.
    pub fn new(pattern: &str) -> Result<Self, ControlError> {
        let regex =
            Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ControlError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for NamePattern {}

/// A tagged `(code, value)` record emitted by the document loader.
///
/// Only `RemoveNode` and `RemoveValue` survive into a tree: they are consumed
/// when the node carrying them is merged into another. The remaining codes
/// are resolved by the loader itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    RemoveNode(NamePattern),
    RemoveValue(NamePattern),
    Include(String),
    Using(String),
    Mux,
    FilterOnly(String),
    FilterOut(String),
}

impl Control {
    /// # Errors
    /// Returns `ControlError::InvalidPattern` for an invalid regex.
    pub fn remove_node(pattern: &str) -> Result<Self, ControlError> {
        NamePattern::new(pattern).map(Self::RemoveNode)
    }

    /// # Errors
    /// Returns `ControlError::InvalidPattern` for an invalid regex.
    pub fn remove_value(pattern: &str) -> Result<Self, ControlError> {
        NamePattern::new(pattern).map(Self::RemoveValue)
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RemoveNode(_) => "remove_node",
            Self::RemoveValue(_) => "remove_value",
            Self::Include(_) => "include",
            Self::Using(_) => "using",
            Self::Mux => "mux",
            Self::FilterOnly(_) => "filter_only",
            Self::FilterOut(_) => "filter_out",
        }
    }

    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::RemoveNode(p) | Self::RemoveValue(p) => p.as_str(),
            Self::Include(s) | Self::Using(s) | Self::FilterOnly(s) | Self::FilterOut(s) => s,
            Self::Mux => "",
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.code(), self.value())
    }
}

/// Render a control list the way fingerprints embed it.
pub(crate) fn controls_to_string(controls: &[Control]) -> String {
    let items: Vec<String> = controls.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}
