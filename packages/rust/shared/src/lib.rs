//! Shared types, error model, and configuration for khub.
//!
//! This crate is the foundation depended on by all other khub crates.
//! It provides:
//! - [`KhubError`]: the unified error type
//! - [`AuthenticationHeader`]: per-source credential descriptor
//! - Domain types ([`Record`], [`RecordExt`], [`CrawlResult`])
//! - Configuration ([`AppConfig`], config loading and validation)

pub mod auth;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use auth::AuthenticationHeader;
pub use config::{
    AppConfig, CrawlConfig, DEFAULT_CONFIG_PATH, HeaderConfig, PathsConfig, PipelineConfig,
    SourceConfig, StageCommandConfig, StoreConfig, StoreHostConfig, StoreLocation, init_config,
    load_config_from, load_or_init_config,
};
pub use error::{KhubError, Result};
pub use types::{CrawlResult, Record, RecordExt};
