//! Preview Sync - live-edit a dev server running inside a sandbox
//!
//! This library boots a sandbox, mounts a starter project into it, installs
//! dependencies, starts the dev server and keeps one project file in sync
//! with an editable surface while a preview surface follows the server.

pub mod backoff;
pub mod config;
pub mod controller;
pub mod dev_server;
pub mod error;
pub mod monitor;
pub mod sandbox;
pub mod session;
pub mod surface;
pub mod template;

pub use config::{CommandSpec, EditPolicy, SyncConfig, Validate, ValidationResult};
pub use controller::{EditOutcome, SyncController};
pub use dev_server::DevServerEvent;
pub use error::{Error, Result};
pub use monitor::{BootPhase, BootSummary};
pub use sandbox::{
    LocalSandbox, LocalSandboxConfig, LocalSandboxProvider, MemorySandbox, MemorySandboxProvider,
    ProcessOutput, Sandbox, SandboxProcess, SandboxProvider, ServerReady,
};
pub use session::SessionState;
pub use surface::{EditableSurface, InputEvent, PreviewSurface, PLACEHOLDER_URL};
pub use template::{FileNode, FileTree};
