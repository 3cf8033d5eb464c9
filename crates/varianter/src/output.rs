//! Rendering of variants for the terminal.

use comfy_table::{Cell, Color, Table};
use serde::Serialize;
use std::str::FromStr;
use varianter_core::{Value, VariantEntry, VariantRecord, Varianter};

/// Output format for the variant listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Tree view and variant list, as printed before a test run.
    #[default]
    Text,
    Table,
    /// The replayable dump.
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "unknown format: {s}. Valid formats: text, table, json"
            )),
        }
    }
}

/// Parsed `--get KEY[@PATH]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub key: String,
    pub path: Option<String>,
}

impl FromStr for Query {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, path) = match s.split_once('@') {
            Some((key, path)) => (key, Some(path.to_string())),
            None => (s, None),
        };
        if key.is_empty() {
            return Err(format!("missing key in query '{s}'"));
        }
        Ok(Self {
            key: key.to_string(),
            path,
        })
    }
}

/// Result of a query in one variant.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved {
    pub variant_id: Option<String>,
    pub key: String,
    pub path: Option<String>,
    pub value: Value,
}

fn display_id(entry_id: Option<&str>) -> &str {
    entry_id.unwrap_or("(defaults)")
}

#[must_use]
pub fn format_text(varianter: &Varianter, summary: u8, variants: u8, use_utf8: bool) -> String {
    varianter.to_str(summary, variants, use_utf8)
}

#[must_use]
pub fn format_table(entries: &[VariantEntry]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["#", "Variant ID", "Leaves", "Parameters"]);
    for (index, entry) in entries.iter().enumerate() {
        let leaves: Vec<&str> = entry.variant.iter().map(|leaf| leaf.path.as_str()).collect();
        let params: usize = entry.variant.iter().map(|leaf| leaf.environment.len()).sum();
        table.add_row(vec![
            Cell::new(index + 1),
            Cell::new(display_id(entry.variant_id.as_deref())).fg(Color::Cyan),
            Cell::new(leaves.join("\n")),
            Cell::new(params),
        ]);
    }
    table.to_string()
}

#[must_use]
pub fn format_resolved_text(resolved: &[Resolved]) -> String {
    resolved
        .iter()
        .map(|r| {
            format!(
                "Variant {}:    {} => {}",
                display_id(r.variant_id.as_deref()),
                r.key,
                r.value
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[must_use]
pub fn format_resolved_table(resolved: &[Resolved]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Variant ID", "Key", "Value"]);
    for r in resolved {
        let value = if r.value.is_null() {
            Cell::new("-").fg(Color::DarkGrey)
        } else {
            Cell::new(&r.value)
        };
        table.add_row(vec![
            Cell::new(display_id(r.variant_id.as_deref())).fg(Color::Cyan),
            Cell::new(&r.key),
            value,
        ]);
    }
    table.to_string()
}

/// Pretty JSON; the dump format when given [`VariantRecord`]s.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

/// Records for `--format json` without a query.
#[must_use]
pub fn records(entries: &[VariantEntry]) -> Vec<VariantRecord> {
    entries.iter().map(VariantRecord::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use varianter_core::{Environment, Leaf};

    fn entry(id: Option<&str>, path: &str) -> VariantEntry {
        let mut env = Environment::default();
        env.set("arch", "x86".into(), path);
        VariantEntry {
            variant_id: id.map(str::to_string),
            variant: vec![Arc::new(Leaf::from_record(path, env))],
            mux_path: vec!["/run/*".to_string()],
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("TABLE".parse::<OutputFormat>(), Ok(OutputFormat::Table));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!(
            "yaml"
                .parse::<OutputFormat>()
                .is_err_and(|e| e.contains("Valid formats"))
        );
    }

    #[test]
    fn test_query_from_str() {
        assert_eq!(
            "arch".parse::<Query>(),
            Ok(Query {
                key: "arch".to_string(),
                path: None
            })
        );
        assert_eq!(
            "arch@/run/hw/*".parse::<Query>(),
            Ok(Query {
                key: "arch".to_string(),
                path: Some("/run/hw/*".to_string())
            })
        );
        assert!("@/run".parse::<Query>().is_err());
    }

    #[test]
    fn test_format_table() {
        let entries = vec![entry(Some("cpu-1a2b"), "/run/hw/cpu"), entry(None, "/os")];
        let table = format_table(&entries);
        assert!(table.contains("Variant ID"));
        assert!(table.contains("cpu-1a2b"));
        assert!(table.contains("/run/hw/cpu"));
        assert!(table.contains("(defaults)"));
    }

    #[test]
    fn test_format_resolved() {
        let resolved = vec![
            Resolved {
                variant_id: Some("cpu-1a2b".to_string()),
                key: "arch".to_string(),
                path: None,
                value: "x86".into(),
            },
            Resolved {
                variant_id: Some("gpu-3c4d".to_string()),
                key: "arch".to_string(),
                path: None,
                value: Value::Null,
            },
        ];
        assert_eq!(
            format_resolved_text(&resolved),
            "Variant cpu-1a2b:    arch => x86\nVariant gpu-3c4d:    arch => null"
        );
        let table = format_resolved_table(&resolved);
        assert!(table.contains("x86"));
        assert!(table.contains('-'));
    }

    #[test]
    fn test_records_json() -> Result<(), Box<dyn std::error::Error>> {
        let json = format_json(&records(&[entry(Some("cpu-1a2b"), "/run/hw/cpu")]))?;
        let parsed: serde_json::Value = serde_json::from_str(&json)?;
        assert_eq!(parsed[0]["variant_id"], "cpu-1a2b");
        assert_eq!(
            parsed[0]["variant"][0]["env"],
            serde_json::json!([["/run/hw/cpu", "arch", "x86"]])
        );
        Ok(())
    }
}
