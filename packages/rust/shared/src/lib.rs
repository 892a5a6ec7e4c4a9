//! Shared types, error model, and configuration for the outreach pipeline.
//!
//! This crate is the foundation depended on by all other outreach crates.
//! It provides:
//! - [`OutreachError`], the unified error type and taxonomy
//! - Domain types ([`JobId`], [`ArtifactId`], [`JobStatus`], [`TemplateKind`],
//!   [`Citation`], [`JobInputs`], [`StatusPayload`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CitationsConfig, DefaultsConfig, GatherConfig, SearchConfig, SynthesisConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{OutreachError, Result};
pub use types::{
    ArtifactId, ArtifactRecord, Citation, JobId, JobInputs, JobStatus, StatusPayload, StepTiming,
    TemplateKind,
};
