//! Core library for the varianter CLI.
//!
//! This crate turns YAML descriptions of test parameters into test variants:
//! - Document loading with control tags (`!mux`, `!include`, `!using`, ...)
//! - Parameter trees with inherited environments
//! - Multiplexing into variants, with `filter-only`/`filter-out` pruning
//! - Parameter lookup per variant (`mux_path` scopes, clash detection)
//! - Variant dumps that can be replayed without re-parsing

pub mod config;
pub mod control;
pub mod filter;
pub mod loader;
pub mod mux;
pub mod params;
pub mod tree;
pub mod value;
pub mod varianter;

pub use config::{
    ConfigError, ConfigOverrides, VarianterConfig, apply_overrides, load_config, validate_config,
};
pub use control::{Control, ControlError, NamePattern};
pub use filter::apply_filters;
pub use loader::{LoaderError, create_from_yaml, split_reference};
pub use mux::{Leaf, MuxTree, Variant, generate_variant_id, is_empty_variant, is_valid_variant};
pub use params::{ParamScope, Params, ParamsError, PathPattern};
pub use tree::{EnvEntry, Environment, FilterSet, Filters, Node, NodeId, Tree, TreeError};
pub use value::{Value, ValueMap};
pub use varianter::{
    FrozenSource, LeafRecord, MuxSource, VariantEntry, VariantRecord, VariantSource, Varianter,
    VarianterError, parse_inject, variant_to_str,
};
