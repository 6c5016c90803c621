//! Core error types for capstan

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a deployment run
#[derive(Error, Debug)]
pub enum DeployError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Path resolution error
    #[error("Path resolution error: {0}")]
    PathResolution(#[from] PathResolutionError),

    /// Transfer error
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Execution error
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Deploy script exited with a non-zero code
    #[error("Deploy script failed with exit code {exit_code}: {detail}")]
    DeployScriptFailed { exit_code: i32, detail: String },

    /// Run interrupted by the operator
    #[error("Interrupted by operator")]
    Interrupted,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-related errors
///
/// Authentication failure and network failure are distinguished for
/// operator messaging; both are terminal for the run.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Credentials were rejected by the server
    #[error("Authentication failed for {user}@{address}")]
    AuthenticationFailed { user: String, address: String },

    /// Connection attempt did not complete within the bound
    #[error("Connection to {address} timed out after {seconds}s")]
    Timeout { address: String, seconds: u64 },

    /// Host could not be reached
    #[error("Failed to connect to {address}: {detail}")]
    Unreachable { address: String, detail: String },

    /// Private key could not be loaded
    #[error("Failed to load private key {path}: {detail}")]
    KeyLoad { path: PathBuf, detail: String },

    /// The file-transfer sub-channel could not be derived
    #[error("Failed to open file-transfer channel: {0}")]
    ChannelSetup(String),

    /// Session was used after close
    #[error("Session is closed")]
    SessionClosed,
}

/// No candidate deployment root exists on the remote host
#[derive(Error, Debug)]
#[error("No deployment root found among {} candidates", probed.len())]
pub struct PathResolutionError {
    /// Candidates probed, in order
    pub probed: Vec<String>,
    /// Best-effort listing of a nearby directory, for diagnostics
    pub listing: Vec<String>,
}

/// File-transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    /// Local artifact could not be read
    #[error("Failed to read local file {path}: {detail}")]
    LocalRead { path: PathBuf, detail: String },

    /// Transport failure while streaming
    #[error("Transfer of {remote_path} failed: {detail}")]
    Transport { remote_path: String, detail: String },

    /// Remote size does not match local size after transfer
    #[error(
        "Size mismatch for {remote_path}: local {local_size} bytes, remote {remote_size} bytes"
    )]
    SizeMismatch {
        remote_path: String,
        local_size: u64,
        remote_size: u64,
    },
}

/// Remote command execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Exec channel could not be opened
    #[error("Failed to open exec channel: {0}")]
    ChannelOpen(String),

    /// Transport lost while a command was running
    #[error("Connection lost while running command: {0}")]
    TransportLost(String),

    /// Buffered command exceeded its bound
    #[error("Command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Channel closed without reporting an exit status
    #[error("Remote command ended without an exit status")]
    NoExitStatus,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
