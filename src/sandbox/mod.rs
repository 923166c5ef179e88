//! Sandbox runtimes that host the dev server.
//!
//! This module provides the [`SandboxProvider`] and [`Sandbox`] traits, the
//! host-directory [`LocalSandbox`] and the scripted in-memory
//! [`MemorySandbox`].

mod local;
mod memory;
mod provider;

pub use local::{detect_server_url, LocalSandbox, LocalSandboxConfig, LocalSandboxProvider};
pub use memory::{MemorySandbox, MemorySandboxProvider, SandboxCall, ScriptedCommand};
pub use provider::{
    command_line, ProcessOutput, Sandbox, SandboxProcess, SandboxProvider, ServerReady,
};
