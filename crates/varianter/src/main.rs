//! varianter CLI - list, dump and query test variants.

mod output;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use output::{OutputFormat, Query, Resolved};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use varianter_core::{
    ConfigOverrides, ParamsError, Value, VariantEntry, Varianter, VarianterConfig, apply_overrides,
    load_config, validate_config,
};

/// Exit codes for the CLI.
mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const CONFIG_ERROR: u8 = 2;
    pub const LOOKUP_CLASH: u8 = 3;
}

const DEFAULT_CONFIG: &str = "varianter.yaml";

#[derive(Parser)]
#[command(name = "varianter")]
#[command(about = "Multiplex YAML parameter trees into test variants")]
#[command(version)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// YAML documents ([using:]path, globs allowed)
    #[arg(short = 'm', long = "mux-yaml", value_name = "FILE", num_args = 1..)]
    mux_yaml: Vec<String>,

    /// Keep only these paths among their siblings
    #[arg(long, value_name = "PATH", num_args = 1..)]
    mux_filter_only: Vec<String>,

    /// Remove these paths
    #[arg(long, value_name = "PATH", num_args = 1..)]
    mux_filter_out: Vec<String>,

    /// Relative lookup scopes (default: /run/*)
    #[arg(long, value_name = "PATH", num_args = 1..)]
    mux_path: Vec<String>,

    /// Inject values after merging: [PATH:]KEY:VALUE
    #[arg(long, value_name = "[PATH:]KEY:VALUE", num_args = 1..)]
    mux_inject: Vec<String>,

    /// Configuration file (default: ./varianter.yaml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the variants dump to FILE
    #[arg(long, value_name = "FILE")]
    json_variants_dump: Option<PathBuf>,

    /// Replay variants from a dump instead of parsing documents
    #[arg(long, value_name = "FILE")]
    json_variants_load: Option<PathBuf>,

    /// Tree view verbosity (0 = off)
    #[arg(long, default_value_t = 0)]
    summary: u8,

    /// Variant listing verbosity (0 = off)
    #[arg(long, default_value_t = 1)]
    variants: u8,

    /// Output format: text, table, json
    #[arg(long, default_value = "text")]
    format: String,

    /// Resolve KEY (optionally under PATH) in every variant
    #[arg(long, value_name = "KEY[@PATH]")]
    get: Option<String>,

    /// Draw the tree with ASCII characters only
    #[arg(long)]
    ascii: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }

    match run_command(&cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(err) => {
            eprintln!("{}: {err:#}", "error".red());
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    let clash = err.chain().any(|cause| {
        cause
            .downcast_ref::<ParamsError>()
            .is_some_and(|e| matches!(e, ParamsError::Clash { .. }))
    });
    if clash {
        exit_code::LOOKUP_CLASH
    } else {
        exit_code::CONFIG_ERROR
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

fn load_base_config(path: Option<&Path>) -> Result<VarianterConfig> {
    let path = match path {
        Some(path) if !path.exists() => bail!("config file not found: {}", path.display()),
        Some(path) => path,
        None => Path::new(DEFAULT_CONFIG),
    };
    load_config(path).with_context(|| format!("failed to load config {}", path.display()))
}

fn run_command(cli: &Cli) -> Result<()> {
    let format: OutputFormat = cli
        .format
        .parse()
        .map_err(|e: String| anyhow::anyhow!("invalid format: {e}"))?;
    let query: Option<Query> = cli
        .get
        .as_deref()
        .map(str::parse::<Query>)
        .transpose()
        .map_err(|e: String| anyhow::anyhow!("invalid --get: {e}"))?;

    let overrides = ConfigOverrides {
        files: non_empty(&cli.mux_yaml),
        mux_path: non_empty(&cli.mux_path),
        mux_filter_only: non_empty(&cli.mux_filter_only),
        mux_filter_out: non_empty(&cli.mux_filter_out),
        mux_inject: non_empty(&cli.mux_inject),
        dump_path: cli.json_variants_dump.clone(),
        load_path: cli.json_variants_load.clone(),
    };
    let config = apply_overrides(load_base_config(cli.config.as_deref())?, &overrides);
    validate_config(&config).context("invalid configuration")?;

    let mut varianter = Varianter::new();
    varianter.parse(&config).context("failed to produce variants")?;
    tracing::debug!(variants = varianter.len(), "varianter ready");

    let entries: Vec<VariantEntry> = varianter.variants().collect();
    match query {
        Some(query) => print_query(&entries, &query, format),
        None => {
            match format {
                OutputFormat::Text => {
                    let text = output::format_text(&varianter, cli.summary, cli.variants, !cli.ascii);
                    if !text.is_empty() {
                        println!("{text}");
                    }
                }
                OutputFormat::Table => println!("{}", output::format_table(&entries)),
                OutputFormat::Json => println!("{}", output::format_json(&output::records(&entries))?),
            }
            Ok(())
        }
    }
}

fn print_query(entries: &[VariantEntry], query: &Query, format: OutputFormat) -> Result<()> {
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = entry.variant_id.as_deref().unwrap_or("(defaults)");
        let params = entry.params()?;
        let value = params
            .get(&query.key, query.path.as_deref(), Value::Null)
            .with_context(|| format!("lookup of '{}' failed in variant {id}", query.key))?;
        resolved.push(Resolved {
            variant_id: entry.variant_id.clone(),
            key: query.key.clone(),
            path: query.path.clone(),
            value,
        });
    }

    match format {
        OutputFormat::Text => println!("{}", output::format_resolved_text(&resolved)),
        OutputFormat::Table => println!("{}", output::format_resolved_table(&resolved)),
        OutputFormat::Json => println!("{}", output::format_json(&resolved)?),
    }
    Ok(())
}
