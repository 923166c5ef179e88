//! In-memory scripted sandbox.
//!
//! [`MemorySandboxProvider`] boots sandboxes that keep their file tree in
//! memory and answer `spawn` from a script instead of running programs. Every
//! call is recorded so callers can assert on ordering. Clones of a provider
//! share state with the sandboxes it boots.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};

use crate::error::{Error, Result};
use crate::template::{path_segments, FileNode, FileTree};

use super::provider::{
    command_line, ProcessOutput, Sandbox, SandboxProcess, SandboxProvider, ServerReady,
    OUTPUT_CAPACITY, SERVER_READY_CAPACITY,
};

/// Scripted behavior for one command line.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCommand {
    /// Stdout lines emitted on spawn.
    pub output: Vec<String>,
    /// Exit code, or `None` for a process that never exits on its own.
    pub exit_code: Option<i32>,
    /// Server-ready notification published right after spawn.
    pub server_ready: Option<ServerReady>,
    /// Delay before output and exit are delivered.
    pub delay: Option<Duration>,
}

impl ScriptedCommand {
    /// A command that exits with `code` after printing `output`.
    pub fn exits(code: i32, output: &[&str]) -> Self {
        Self {
            output: output.iter().map(|s| s.to_string()).collect(),
            exit_code: Some(code),
            ..Default::default()
        }
    }

    /// A long-running command that never exits on its own.
    pub fn long_running() -> Self {
        Self::default()
    }

    /// Publishes `ready` right after the command is spawned.
    pub fn with_server_ready(mut self, ready: ServerReady) -> Self {
        self.server_ready = Some(ready);
        self
    }

    /// Delays output and exit by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A call made against a memory sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxCall {
    /// The provider booted a sandbox.
    Boot,
    /// A tree with this many files was mounted.
    Mount { files: usize },
    /// A command was spawned.
    Spawn { command: String },
    /// A file was written.
    WriteFile { path: String, contents: String },
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    calls: Vec<SandboxCall>,
    scripts: HashMap<String, ScriptedCommand>,
    // Exit senders of processes that have not exited yet.
    running: HashMap<String, oneshot::Sender<i32>>,
    fail_boot: Option<String>,
    fail_mount: Option<String>,
    fail_writes: Option<String>,
    boot_delay: Option<Duration>,
    ready_tx: Option<broadcast::Sender<ServerReady>>,
}

/// Provider for in-memory scripted sandboxes.
#[derive(Clone, Default)]
pub struct MemorySandboxProvider {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySandboxProvider {
    /// Creates a provider with no scripted commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the behavior of `command` (program and args joined by spaces).
    pub async fn script(&self, command: &str, script: ScriptedCommand) {
        self.state
            .lock()
            .await
            .scripts
            .insert(command.to_string(), script);
    }

    /// Makes the next boot fail with `reason`.
    pub async fn fail_boot(&self, reason: &str) {
        self.state.lock().await.fail_boot = Some(reason.to_string());
    }

    /// Makes every mount fail with `reason`.
    pub async fn fail_mount(&self, reason: &str) {
        self.state.lock().await.fail_mount = Some(reason.to_string());
    }

    /// Makes every write fail with `reason`, or clears the failure.
    pub async fn fail_writes(&self, reason: Option<&str>) {
        self.state.lock().await.fail_writes = reason.map(str::to_string);
    }

    /// Delays boot by `delay`.
    pub async fn set_boot_delay(&self, delay: Duration) {
        self.state.lock().await.boot_delay = Some(delay);
    }

    /// Publishes a server-ready notification from the booted sandbox.
    ///
    /// Returns false if no sandbox has been booted or nobody is subscribed.
    pub async fn emit_server_ready(&self, ready: ServerReady) -> bool {
        match &self.state.lock().await.ready_tx {
            Some(tx) => tx.send(ready).is_ok(),
            None => false,
        }
    }

    /// Makes a running scripted process exit with `code`.
    pub async fn exit_process(&self, command: &str, code: i32) -> bool {
        match self.state.lock().await.running.remove(command) {
            Some(tx) => tx.send(code).is_ok(),
            None => false,
        }
    }

    /// Returns every call recorded so far.
    pub async fn calls(&self) -> Vec<SandboxCall> {
        self.state.lock().await.calls.clone()
    }

    /// Returns the recorded spawn command lines in order.
    pub async fn spawned(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                SandboxCall::Spawn { command } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the recorded writes as `(path, contents)` in order.
    pub async fn writes(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                SandboxCall::WriteFile { path, contents } => Some((path.clone(), contents.clone())),
                _ => None,
            })
            .collect()
    }

    /// Returns the current contents of a file in the sandbox.
    pub async fn file(&self, path: &str) -> Option<String> {
        let key = normalize(path).ok()?;
        self.state.lock().await.files.get(&key).cloned()
    }
}

#[async_trait]
impl SandboxProvider for MemorySandboxProvider {
    type Sandbox = MemorySandbox;

    async fn boot(&self) -> Result<Self::Sandbox> {
        let delay = self.state.lock().await.boot_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.calls.push(SandboxCall::Boot);
        if let Some(reason) = state.fail_boot.take() {
            return Err(Error::SandboxBoot(reason));
        }

        let (ready_tx, _) = broadcast::channel(SERVER_READY_CAPACITY);
        state.ready_tx = Some(ready_tx.clone());

        Ok(MemorySandbox {
            id: uuid::Uuid::new_v4().to_string(),
            state: self.state.clone(),
            ready_tx,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// A sandbox whose file tree lives in memory.
#[derive(Debug)]
pub struct MemorySandbox {
    id: String,
    state: Arc<Mutex<MemoryState>>,
    ready_tx: broadcast::Sender<ServerReady>,
}

#[async_trait]
impl Sandbox for MemorySandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mount(&self, tree: &FileTree) -> Result<()> {
        tree.validate()?;

        let mut state = self.state.lock().await;
        if let Some(reason) = &state.fail_mount {
            return Err(Error::Mount(reason.clone()));
        }

        let mut pending: Vec<(String, &FileTree)> = vec![(String::new(), tree)];
        let mut files = 0usize;
        while let Some((prefix, subtree)) = pending.pop() {
            for (name, node) in subtree.entries() {
                let path = if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", prefix, name)
                };
                match node {
                    FileNode::File { contents } => {
                        state.files.insert(path, contents.clone());
                        files += 1;
                    }
                    FileNode::Directory(child) => {
                        state.dirs.insert(path.clone());
                        pending.push((path, child));
                    }
                }
            }
        }

        state.calls.push(SandboxCall::Mount { files });
        Ok(())
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<SandboxProcess> {
        let command = command_line(program, args);
        let mut state = self.state.lock().await;
        state.calls.push(SandboxCall::Spawn {
            command: command.clone(),
        });

        let script = state.scripts.get(&command).cloned().ok_or_else(|| Error::Spawn {
            command: command.clone(),
            reason: "command not found".to_string(),
        })?;

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CAPACITY.max(script.output.len()));
        let (exit_tx, exit_rx) = oneshot::channel();

        if let Some(ready) = &script.server_ready {
            let _ = self.ready_tx.send(ready.clone());
        }

        match script.exit_code {
            Some(code) => {
                tokio::spawn(async move {
                    if let Some(delay) = script.delay {
                        tokio::time::sleep(delay).await;
                    }
                    for line in script.output {
                        let _ = out_tx.send(ProcessOutput::Stdout(line)).await;
                    }
                    drop(out_tx);
                    let _ = exit_tx.send(code);
                });
            }
            None => {
                tokio::spawn(async move {
                    if let Some(delay) = script.delay {
                        tokio::time::sleep(delay).await;
                    }
                    for line in script.output {
                        let _ = out_tx.send(ProcessOutput::Stdout(line)).await;
                    }
                });
                state.running.insert(command.clone(), exit_tx);
            }
        }

        Ok(SandboxProcess::new(command, out_rx, exit_rx))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let key = normalize(path)?;
        let mut state = self.state.lock().await;
        state.calls.push(SandboxCall::WriteFile {
            path: path.to_string(),
            contents: contents.to_string(),
        });

        if let Some(reason) = &state.fail_writes {
            return Err(Error::Write {
                path: path.to_string(),
                reason: reason.clone(),
            });
        }
        let parent_exists = match key.rsplit_once('/') {
            Some((parent, _)) => state.dirs.contains(parent),
            None => true,
        };
        if !parent_exists {
            return Err(Error::Write {
                path: path.to_string(),
                reason: "parent directory does not exist".to_string(),
            });
        }

        state.files.insert(key, contents.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let key = normalize(path)?;
        self.state
            .lock()
            .await
            .files
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Read {
                path: path.to_string(),
                reason: "no such file".to_string(),
            })
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let prefix = if path.trim_matches('/').is_empty() {
            String::new()
        } else {
            let key = normalize(path)?;
            if !self.state.lock().await.dirs.contains(&key) {
                return Err(Error::Read {
                    path: path.to_string(),
                    reason: "no such directory".to_string(),
                });
            }
            format!("{}/", key)
        };

        let state = self.state.lock().await;
        let names: BTreeSet<String> = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter_map(|p| p.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    fn subscribe_server_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.ready_tx.subscribe()
    }
}

fn normalize(path: &str) -> Result<String> {
    Ok(path_segments(path)?.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> FileTree {
        FileTree::new()
            .with_file("package.json", "{}")
            .with_directory("src", FileTree::new().with_file("main.ts", "old"))
    }

    #[tokio::test]
    async fn mount_then_read_and_list() {
        let provider = MemorySandboxProvider::new();
        let sandbox = provider.boot().await.unwrap();
        sandbox.mount(&tree()).await.unwrap();

        assert_eq!(sandbox.read_file("/src/main.ts").await.unwrap(), "old");
        assert_eq!(
            sandbox.read_dir("/").await.unwrap(),
            vec!["package.json", "src"]
        );
        assert_eq!(sandbox.read_dir("/src").await.unwrap(), vec!["main.ts"]);
        assert!(sandbox.read_dir("/nope").await.is_err());
    }

    #[tokio::test]
    async fn write_requires_existing_parent() {
        let provider = MemorySandboxProvider::new();
        let sandbox = provider.boot().await.unwrap();
        sandbox.mount(&tree()).await.unwrap();

        sandbox.write_file("/src/main.ts", "new").await.unwrap();
        assert_eq!(provider.file("/src/main.ts").await.as_deref(), Some("new"));

        let err = sandbox.write_file("/lib/x.ts", "x").await.unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
    }

    #[tokio::test]
    async fn scripted_command_reports_output_and_exit() {
        let provider = MemorySandboxProvider::new();
        provider
            .script("npm install", ScriptedCommand::exits(3, &["resolving"]))
            .await;
        let sandbox = provider.boot().await.unwrap();

        let process = sandbox
            .spawn("npm", &["install".to_string()])
            .await
            .unwrap();
        let mut lines = Vec::new();
        let code = process
            .wait_with_output(|o| lines.push(o.line().to_string()))
            .await
            .unwrap();

        assert_eq!(code, 3);
        assert_eq!(lines, vec!["resolving"]);
        assert_eq!(provider.spawned().await, vec!["npm install"]);
    }

    #[tokio::test]
    async fn unscripted_command_fails_to_spawn() {
        let provider = MemorySandboxProvider::new();
        let sandbox = provider.boot().await.unwrap();

        let err = sandbox.spawn("make", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Spawn { command, .. } if command == "make"));
    }

    #[tokio::test]
    async fn long_running_process_exits_on_demand() {
        let provider = MemorySandboxProvider::new();
        provider
            .script("npm run dev", ScriptedCommand::long_running())
            .await;
        let sandbox = provider.boot().await.unwrap();

        let process = sandbox
            .spawn("npm", &["run".to_string(), "dev".to_string()])
            .await
            .unwrap();
        assert!(provider.exit_process("npm run dev", 0).await);
        assert_eq!(process.wait_with_output(|_| {}).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_applies_to_long_running_output() {
        let provider = MemorySandboxProvider::new();
        provider
            .script(
                "npm run dev",
                ScriptedCommand {
                    output: vec!["compiled".to_string()],
                    ..ScriptedCommand::long_running()
                }
                .with_delay(Duration::from_secs(2)),
            )
            .await;
        let sandbox = provider.boot().await.unwrap();

        let start = tokio::time::Instant::now();
        let process = sandbox
            .spawn("npm", &["run".to_string(), "dev".to_string()])
            .await
            .unwrap();
        let (_, mut output, _exit) = process.into_parts();

        assert_eq!(
            output.recv().await,
            Some(ProcessOutput::Stdout("compiled".to_string()))
        );
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn boot_failure_is_reported_once() {
        let provider = MemorySandboxProvider::new();
        provider.fail_boot("no wasm").await;

        assert!(matches!(provider.boot().await, Err(Error::SandboxBoot(_))));
        assert!(provider.boot().await.is_ok());
    }
}
