//! Sandbox runtime traits and types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{Error, Result};
use crate::template::FileTree;

/// Capacity of the server-ready broadcast channel.
pub const SERVER_READY_CAPACITY: usize = 16;

/// Capacity of a process output channel.
pub const OUTPUT_CAPACITY: usize = 256;

/// Notification that a process inside the sandbox is serving HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReady {
    /// Port the server listens on.
    pub port: u16,
    /// URL the preview surface should load.
    pub url: String,
}

impl ServerReady {
    /// Creates a server-ready notification.
    pub fn new(port: u16, url: impl Into<String>) -> Self {
        Self {
            port,
            url: url.into(),
        }
    }
}

/// One line of output from a sandboxed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    /// Standard output line.
    Stdout(String),
    /// Standard error line.
    Stderr(String),
}

impl ProcessOutput {
    /// Returns the line text.
    pub fn line(&self) -> &str {
        match self {
            Self::Stdout(line) | Self::Stderr(line) => line,
        }
    }
}

/// Handle to a command spawned inside a sandbox.
///
/// The runtime closes the output channel once the process stops writing and
/// resolves the exit channel once it has exited.
#[derive(Debug)]
pub struct SandboxProcess {
    command: String,
    output: mpsc::Receiver<ProcessOutput>,
    exit: oneshot::Receiver<i32>,
}

impl SandboxProcess {
    /// Creates a process handle from its output and exit channels.
    pub fn new(
        command: impl Into<String>,
        output: mpsc::Receiver<ProcessOutput>,
        exit: oneshot::Receiver<i32>,
    ) -> Self {
        Self {
            command: command.into(),
            output,
            exit,
        }
    }

    /// Returns the command line this process was spawned with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Drains all output into `sink`, then waits for the exit code.
    pub async fn wait_with_output<F>(mut self, mut sink: F) -> Result<i32>
    where
        F: FnMut(ProcessOutput) + Send,
    {
        while let Some(output) = self.output.recv().await {
            sink(output);
        }
        self.exit.await.map_err(|_| Error::Spawn {
            command: self.command.clone(),
            reason: "process ended without reporting an exit code".to_string(),
        })
    }

    /// Splits the handle into its command, output and exit channels.
    pub fn into_parts(
        self,
    ) -> (
        String,
        mpsc::Receiver<ProcessOutput>,
        oneshot::Receiver<i32>,
    ) {
        (self.command, self.output, self.exit)
    }
}

/// A running sandbox instance.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Returns the unique id of this sandbox.
    fn id(&self) -> &str;

    /// Mounts a file tree at the sandbox root.
    async fn mount(&self, tree: &FileTree) -> Result<()>;

    /// Spawns `program` with `args` inside the sandbox.
    async fn spawn(&self, program: &str, args: &[String]) -> Result<SandboxProcess>;

    /// Writes `contents` to `path`, overwriting any existing file.
    ///
    /// The parent directory must already exist.
    async fn write_file(&self, path: &str, contents: &str) -> Result<()>;

    /// Reads the file at `path`.
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Lists the entry names of the directory at `path`, sorted.
    async fn read_dir(&self, path: &str) -> Result<Vec<String>>;

    /// Subscribes to server-ready notifications.
    fn subscribe_server_ready(&self) -> broadcast::Receiver<ServerReady>;
}

/// Provider for booting sandbox instances.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// The type of sandbox this provider boots.
    type Sandbox: Sandbox + 'static;

    /// Boots a new sandbox.
    async fn boot(&self) -> Result<Self::Sandbox>;

    /// Returns the name of this provider.
    fn name(&self) -> &str;
}

/// Formats a program and its arguments as one command line.
pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
