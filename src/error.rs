//! Error types for the preview sync controller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for sandbox and sync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to acquire a sandbox.
    #[error("failed to boot sandbox: {0}")]
    SandboxBoot(String),

    /// Failed to mount the file tree into the sandbox.
    #[error("failed to mount file tree: {0}")]
    Mount(String),

    /// The dependency install command exited with a non-zero status.
    #[error("dependency installation failed with exit code {exit_code}")]
    InstallFailed { exit_code: i32 },

    /// Failed to spawn a command inside the sandbox.
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// Failed to write a file inside the sandbox.
    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    /// Failed to read a file or directory inside the sandbox.
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// A suspending operation did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// An edit arrived before the sandbox was ready and the policy rejects it.
    #[error("sandbox is not ready yet")]
    NotReady,

    /// The operation is not legal in the current session state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState { operation: String, state: String },

    /// The template has no entry at the given path.
    #[error("template has no entry at {0}")]
    TemplateNotFound(String),

    /// The template is malformed or the entry has the wrong kind.
    #[error("invalid template: {0}")]
    Template(String),

    /// A path is not a valid sandbox path.
    #[error("invalid sandbox path: {0}")]
    InvalidPath(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error on the host.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config could not be parsed.
    #[error("failed to parse config {path}: {reason}")]
    Toml { path: PathBuf, reason: String },
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;
