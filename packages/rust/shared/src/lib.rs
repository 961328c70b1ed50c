//! Shared types, error model, and configuration for Armory.
//!
//! This crate is the foundation depended on by all other Armory crates.
//! It provides:
//! - [`ArmoryError`]: the unified error type
//! - Domain types ([`Category`], [`MilitaryUnit`], [`Progress`], [`TaskId`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, PipelineConfig, PipelineSettings, ScrapeConfig, ServerConfig,
    SketchfabConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from,
};
pub use error::{ArmoryError, Result};
pub use types::{
    Category, CategoryOutcome, MilitaryUnit, NOT_FOUND, OutcomeStatus, Progress, TaskId,
    TaskStatus,
};
