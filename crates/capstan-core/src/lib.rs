//! capstan-core: Core types, errors, and configuration for capstan
//!
//! This crate provides the shared domain types, the error hierarchy, and
//! the configuration structures used by the engine and CLI crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AuthMethod, DeployConfig, DeploymentTarget};
pub use error::DeployError;
pub use types::{Artifact, StageName, StageOutcome, StageResult, TransferProgress};
