//! Host-directory sandbox backed by `tokio::process` children.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::backoff::ExponentialBackoff;
use crate::error::{Error, Result};
use crate::template::{path_segments, FileNode, FileTree};

use super::provider::{
    command_line, ProcessOutput, Sandbox, SandboxProcess, SandboxProvider, ServerReady,
    OUTPUT_CAPACITY, SERVER_READY_CAPACITY,
};

const PROBE_INITIAL: Duration = Duration::from_millis(250);
const PROBE_MAX: Duration = Duration::from_secs(5);

/// URL prefixes a dev server prints when it starts listening.
const LISTEN_PREFIXES: &[&str] = &["http://localhost:", "http://127.0.0.1:", "http://0.0.0.0:"];

/// Settings for host-directory sandboxes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSandboxConfig {
    /// Directory sandboxes are created under. Defaults to the OS temp dir.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Keep the sandbox directory after the sandbox is dropped.
    #[serde(default)]
    pub keep: bool,

    /// Port to probe over TCP for readiness, in addition to output scanning.
    #[serde(default)]
    pub probe_port: Option<u16>,

    /// Extra environment variables for spawned commands.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// A sandbox rooted at a scratch directory on the host.
pub struct LocalSandbox {
    id: String,
    root: PathBuf,
    config: LocalSandboxConfig,
    ready_tx: broadcast::Sender<ServerReady>,
}

impl LocalSandbox {
    /// Returns the host directory backing this sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for segment in path_segments(path)? {
            resolved.push(segment);
        }
        Ok(resolved)
    }

    fn spawn_probe(&self, port: u16, mut exited: watch::Receiver<bool>) {
        let ready_tx = self.ready_tx.clone();
        tokio::spawn(async move {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            let mut backoff = ExponentialBackoff::new(PROBE_INITIAL, PROBE_MAX);
            loop {
                if TcpStream::connect(addr).await.is_ok() {
                    tracing::debug!(port, "readiness probe connected");
                    let url = format!("http://localhost:{}", port);
                    let _ = ready_tx.send(ServerReady::new(port, url));
                    return;
                }
                tokio::select! {
                    _ = backoff.wait() => {}
                    _ = exited.changed() => return,
                }
            }
        });
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mount(&self, tree: &FileTree) -> Result<()> {
        tree.validate()?;

        let mut pending: Vec<(PathBuf, &FileTree)> = vec![(self.root.clone(), tree)];
        let mut written = 0usize;
        while let Some((dir, subtree)) = pending.pop() {
            for (name, node) in subtree.entries() {
                let target = dir.join(name);
                match node {
                    FileNode::File { contents } => {
                        tokio::fs::write(&target, contents).await.map_err(|e| {
                            Error::Mount(format!("{}: {}", target.display(), e))
                        })?;
                        written += 1;
                    }
                    FileNode::Directory(child) => {
                        tokio::fs::create_dir_all(&target).await.map_err(|e| {
                            Error::Mount(format!("{}: {}", target.display(), e))
                        })?;
                        pending.push((target, child));
                    }
                }
            }
        }

        tracing::info!(sandbox = %self.id, files = written, "mounted file tree");
        Ok(())
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<SandboxProcess> {
        let command = command_line(program, args);
        let spawn_error = |reason: String| Error::Spawn {
            command: command.clone(),
            reason,
        };

        tracing::info!(sandbox = %self.id, command = %command, "spawning command");

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout was not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("stderr was not piped".to_string()))?;

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CAPACITY);
        let (mut exit_tx, exit_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        let ready_tx = self.ready_tx.clone();

        if let Some(port) = self.config.probe_port {
            self.spawn_probe(port, exited_rx);
        }

        tokio::spawn(async move {
            let mut stdout_reader = BufReader::new(stdout).lines();
            let mut stderr_reader = BufReader::new(stderr).lines();
            let mut stdout_open = true;
            let mut stderr_open = true;

            while stdout_open || stderr_open {
                let output = tokio::select! {
                    line = stdout_reader.next_line(), if stdout_open => match line {
                        Ok(Some(line)) => ProcessOutput::Stdout(line),
                        Ok(None) => {
                            stdout_open = false;
                            continue;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "error reading stdout");
                            stdout_open = false;
                            continue;
                        }
                    },
                    line = stderr_reader.next_line(), if stderr_open => match line {
                        Ok(Some(line)) => ProcessOutput::Stderr(line),
                        Ok(None) => {
                            stderr_open = false;
                            continue;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "error reading stderr");
                            stderr_open = false;
                            continue;
                        }
                    },
                    _ = exit_tx.closed() => {
                        tracing::debug!("process handle dropped, killing child");
                        let _ = child.start_kill();
                        break;
                    }
                };

                if let Some(ready) = detect_server_url(output.line()) {
                    tracing::debug!(port = ready.port, url = %ready.url, "server announced");
                    let _ = ready_tx.send(ready);
                }
                // Output nobody reads is dropped; the pipes keep draining.
                let _ = out_tx.send(output).await;
            }
            drop(out_tx);

            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    tracing::error!(error = %e, "failed to wait for child");
                    -1
                }
            };
            let _ = exited_tx.send(true);
            let _ = exit_tx.send(code);
        });

        Ok(SandboxProcess::new(command, out_rx, exit_rx))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let target = self.resolve(path)?;
        let write_error = |reason: String| Error::Write {
            path: path.to_string(),
            reason,
        };

        let parent_is_dir = match target.parent() {
            Some(parent) => tokio::fs::metadata(parent)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            None => false,
        };
        if !parent_is_dir {
            return Err(write_error("parent directory does not exist".to_string()));
        }

        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| write_error(e.to_string()))?;

        tracing::debug!(sandbox = %self.id, path = %path, bytes = contents.len(), "wrote file");
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let target = self.resolve(path)?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| Error::Read {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let target = if path.trim_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.resolve(path)?
        };
        let read_error = |e: std::io::Error| Error::Read {
            path: path.to_string(),
            reason: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(&target).await.map_err(read_error)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn subscribe_server_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.ready_tx.subscribe()
    }
}

impl Drop for LocalSandbox {
    fn drop(&mut self) {
        if self.config.keep {
            tracing::info!(path = ?self.root, "keeping sandbox directory");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            tracing::error!(error = %e, path = ?self.root, "failed to clean up sandbox on drop");
        }
    }
}

/// Provider that boots sandboxes as scratch directories on the host.
#[derive(Debug, Clone, Default)]
pub struct LocalSandboxProvider {
    config: LocalSandboxConfig,
}

impl LocalSandboxProvider {
    /// Creates a provider with the given settings.
    pub fn new(config: LocalSandboxConfig) -> Self {
        Self { config }
    }

    fn base_dir(&self) -> PathBuf {
        match &self.config.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join("preview-sync-sandboxes"),
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    type Sandbox = LocalSandbox;

    async fn boot(&self) -> Result<Self::Sandbox> {
        let id = uuid::Uuid::new_v4().to_string();
        let root = self.base_dir().join(format!("preview-sync-{}", id));

        // Created synchronously: the directory must be owned by the returned
        // sandbox with no await point in between.
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::SandboxBoot(format!("failed to create {}: {}", root.display(), e)))?;

        let (ready_tx, _) = broadcast::channel(SERVER_READY_CAPACITY);

        tracing::info!(sandbox = %id, path = ?root, "booted local sandbox");

        Ok(LocalSandbox {
            id,
            root,
            config: self.config.clone(),
            ready_tx,
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Extracts a server-ready notification from a line announcing a local URL.
pub fn detect_server_url(line: &str) -> Option<ServerReady> {
    LISTEN_PREFIXES.iter().find_map(|prefix| {
        let start = line.find(prefix)? + prefix.len();
        let digits: String = line[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        let port = digits.parse::<u16>().ok().filter(|port| *port != 0)?;
        Some(ServerReady::new(port, format!("http://localhost:{}", port)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_announced_urls() {
        assert_eq!(
            detect_server_url("LiveViewJS is listening at: http://localhost:4001"),
            Some(ServerReady::new(4001, "http://localhost:4001"))
        );
        assert_eq!(
            detect_server_url("\u{1b}[34mready on http://127.0.0.1:3000/\u{1b}[0m"),
            Some(ServerReady::new(3000, "http://localhost:3000"))
        );
        assert_eq!(detect_server_url("build succeeded"), None);
        assert_eq!(detect_server_url("see http://localhost:"), None);
        assert_eq!(detect_server_url("http://localhost:99999"), None);
        assert_eq!(detect_server_url("listening on http://localhost:0"), None);
    }

    #[test]
    fn local_config_defaults_are_empty() {
        let config = LocalSandboxConfig::default();

        assert!(config.base_dir.is_none());
        assert!(!config.keep);
        assert!(config.probe_port.is_none());
        assert!(config.env.is_empty());
    }
}
