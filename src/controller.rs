//! Sync controller binding the editable surface, the sandbox and the preview.
//!
//! [`SyncController::boot`] seeds the editable surface, acquires the
//! sandbox, mounts the template, installs dependencies and starts the dev
//! server. [`SyncController::handle_input`] propagates each edit into the
//! sandbox file bound to the editable surface.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::{EditPolicy, SyncConfig};
use crate::dev_server;
use crate::error::{Error, Result};
use crate::monitor::{BootMonitor, BootPhase, BootSummary};
use crate::sandbox::{ProcessOutput, Sandbox, SandboxProvider};
use crate::session::{Session, SessionState};
use crate::surface::{EditableSurface, InputEvent, PreviewSurface};
use crate::template::FileTree;

/// What happened to an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The edit was written to the sandbox.
    Written,
    /// The edit was queued until the sandbox is ready.
    Queued,
}

/// Orchestrates one sandbox session.
pub struct SyncController<P: SandboxProvider> {
    provider: P,
    config: SyncConfig,
    template: FileTree,
    session: Session<P::Sandbox>,
    editor: EditableSurface,
    preview: PreviewSurface,
    // Held across every write so edits reach the sandbox in order.
    pending_edits: Mutex<Vec<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: SandboxProvider> SyncController<P> {
    /// Creates a controller and the receiver for the editor's input events.
    pub fn new(
        provider: P,
        template: FileTree,
        config: SyncConfig,
    ) -> (Self, mpsc::UnboundedReceiver<InputEvent>) {
        let (editor, inputs) = EditableSurface::new();
        let preview = PreviewSurface::new(config.placeholder_url.clone());

        let controller = Self {
            provider,
            config,
            template,
            session: Session::new(),
            editor,
            preview,
            pending_edits: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        };
        (controller, inputs)
    }

    /// Returns the editable surface.
    pub fn editor(&self) -> &EditableSurface {
        &self.editor
    }

    /// Returns the preview surface.
    pub fn preview(&self) -> &PreviewSurface {
        &self.preview
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the session state.
    pub async fn state(&self) -> SessionState {
        self.session.state().await
    }

    /// Runs the boot sequence.
    ///
    /// Fails on any step; the session is then `Failed` and queued edits are
    /// discarded. The dev server is started but not awaited.
    pub async fn boot(&self) -> Result<BootSummary> {
        let initial = self.template.file_contents(&self.config.editable_path)?;
        self.session.begin_boot().await?;
        self.editor.set_value(initial);
        tracing::info!(provider = %self.provider.name(), "booting sandbox");

        match self.run_boot().await {
            Ok(summary) => {
                tracing::info!(
                    sandbox = %summary.sandbox_id,
                    duration_secs = summary.total_duration_secs,
                    "boot complete"
                );
                Ok(summary)
            }
            Err(e) => {
                let mut pending = self.pending_edits.lock().await;
                self.session.fail(e.to_string()).await;
                if !pending.is_empty() {
                    tracing::warn!(dropped = pending.len(), "discarding queued edits after failed boot");
                    pending.clear();
                }
                tracing::error!(error = %e, "boot failed");
                Err(e)
            }
        }
    }

    async fn run_boot(&self) -> Result<BootSummary> {
        let mut monitor = BootMonitor::new();

        let sandbox = with_timeout("sandbox boot", self.config.boot_timeout(), self.provider.boot())
            .await?;
        let sandbox = Arc::new(sandbox);
        self.session.attach(sandbox.clone()).await?;
        monitor.finish_phase(BootPhase::Acquire);

        with_timeout(
            "mount",
            self.config.mount_timeout(),
            sandbox.mount(&self.template),
        )
        .await?;
        self.log_editable_dir(sandbox.as_ref()).await;
        monitor.finish_phase(BootPhase::Mount);

        let exit_code = self.install(sandbox.as_ref(), &mut monitor).await?;
        if exit_code != 0 {
            return Err(Error::InstallFailed { exit_code });
        }
        monitor.finish_phase(BootPhase::Install);

        let server = dev_server::start(sandbox.clone(), &self.config.dev_server).await?;
        let driver = tokio::spawn(dev_server::drive_preview(server.events, self.preview.clone()));
        {
            let mut tasks = self.tasks.lock().await;
            tasks.push(server.task);
            tasks.push(driver);
        }
        monitor.finish_phase(BootPhase::StartDevServer);

        self.flush_and_mark_ready(sandbox.as_ref()).await?;

        Ok(BootSummary::new(sandbox.id(), &monitor))
    }

    async fn install(&self, sandbox: &P::Sandbox, monitor: &mut BootMonitor) -> Result<i32> {
        let install = &self.config.install;
        let process = sandbox.spawn(&install.program, &install.args).await?;
        tracing::info!(command = %process.command(), "installing dependencies");

        let mut lines = 0usize;
        let exit_code = with_timeout(
            "dependency install",
            self.config.install_timeout(),
            process.wait_with_output(|output| {
                lines += 1;
                match output {
                    ProcessOutput::Stdout(line) => tracing::info!(target: "install", "{}", line),
                    ProcessOutput::Stderr(line) => tracing::warn!(target: "install", "{}", line),
                }
            }),
        )
        .await?;
        monitor.record_install_output(lines);

        tracing::info!(exit_code, "dependency install finished");
        Ok(exit_code)
    }

    async fn log_editable_dir(&self, sandbox: &P::Sandbox) {
        let dir = match self.config.editable_path.rsplit_once('/') {
            Some(("", _)) | None => "/",
            Some((dir, _)) => dir,
        };
        match sandbox.read_dir(dir).await {
            Ok(entries) => tracing::debug!(dir = %dir, ?entries, "mounted editable directory"),
            Err(e) => tracing::warn!(dir = %dir, error = %e, "failed to list editable directory"),
        }
    }

    async fn flush_and_mark_ready(&self, sandbox: &P::Sandbox) -> Result<()> {
        let mut pending = self.pending_edits.lock().await;
        let queued: Vec<String> = pending.drain(..).collect();
        if !queued.is_empty() {
            tracing::info!(count = queued.len(), "writing queued edits");
        }
        for text in queued {
            if let Err(e) = self.write(sandbox, &text).await {
                tracing::warn!(error = %e, "failed to write queued edit");
            }
        }
        self.session.mark_ready().await
    }

    async fn write(&self, sandbox: &P::Sandbox, text: &str) -> Result<()> {
        let path = &self.config.editable_path;
        with_timeout(
            "file write",
            self.config.write_timeout(),
            sandbox.write_file(path, text),
        )
        .await?;
        tracing::debug!(path = %path, bytes = text.len(), "propagated edit");
        Ok(())
    }

    /// Propagates the editable surface's full text into the sandbox.
    ///
    /// Before the sandbox is ready the edit is queued or rejected according
    /// to the configured [`EditPolicy`].
    pub async fn handle_input(&self, text: &str) -> Result<EditOutcome> {
        let mut pending = self.pending_edits.lock().await;

        match self.session.state().await {
            SessionState::Ready => {
                let sandbox = self.session.sandbox("write edit").await?;
                self.write(sandbox.as_ref(), text).await?;
                Ok(EditOutcome::Written)
            }
            state if state.is_pending() => match self.config.edit_policy {
                EditPolicy::Queue => {
                    pending.push(text.to_string());
                    tracing::debug!(queued = pending.len(), "queued edit until sandbox is ready");
                    Ok(EditOutcome::Queued)
                }
                EditPolicy::Reject => Err(Error::NotReady),
            },
            state => Err(Error::InvalidState {
                operation: "write edit".to_string(),
                state: state.to_string(),
            }),
        }
    }

    /// Consumes editor input events until the channel closes.
    ///
    /// A failed edit is logged and does not stop the listener.
    pub async fn run_edit_listener(&self, mut inputs: mpsc::UnboundedReceiver<InputEvent>) {
        while let Some(event) = inputs.recv().await {
            match self.handle_input(&event.value).await {
                Ok(outcome) => tracing::trace!(?outcome, "handled edit"),
                Err(e) => tracing::warn!(error = %e, "failed to propagate edit"),
            }
        }
        tracing::debug!("edit listener stopped");
    }

    /// Waits until the preview points at a ready server and returns its URL.
    pub async fn wait_for_preview(&self) -> Result<String> {
        let mut src = self.preview.subscribe();
        let placeholder = self.preview.placeholder().to_string();

        let wait = async move {
            loop {
                {
                    let current = src.borrow_and_update();
                    if *current != placeholder {
                        return Ok(current.clone());
                    }
                }
                if src.changed().await.is_err() {
                    return Err(Error::InvalidState {
                        operation: "wait for preview".to_string(),
                        state: "closed".to_string(),
                    });
                }
            }
        };
        with_timeout("server ready", self.config.ready_timeout(), wait).await
    }

    /// Stops the dev-server tasks.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("controller shut down");
    }
}

impl<P: SandboxProvider> Drop for SyncController<P> {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn with_timeout<T>(
    operation: &str,
    after: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{MemorySandboxProvider, SandboxCall, ScriptedCommand, ServerReady};
    use tokio_test::{assert_err, assert_ok};

    const PATH: &str = "/src/app.ts";

    fn template() -> FileTree {
        FileTree::new().with_directory("src", FileTree::new().with_file("app.ts", "initial"))
    }

    fn config() -> SyncConfig {
        SyncConfig {
            editable_path: PATH.to_string(),
            ..Default::default()
        }
    }

    async fn scripted(install_exit: i32) -> MemorySandboxProvider {
        let provider = MemorySandboxProvider::new();
        provider
            .script("npm install", ScriptedCommand::exits(install_exit, &["added 12 packages"]))
            .await;
        provider
            .script("npm run dev", ScriptedCommand::long_running())
            .await;
        provider
    }

    #[tokio::test]
    async fn boot_runs_steps_in_order() {
        let provider = scripted(0).await;
        let (controller, _inputs) = SyncController::new(provider.clone(), template(), config());

        let summary = assert_ok!(controller.boot().await);

        assert_eq!(summary.install_output_lines, 1);
        assert_eq!(controller.state().await, SessionState::Ready);
        assert_eq!(
            provider.calls().await,
            vec![
                SandboxCall::Boot,
                SandboxCall::Mount { files: 1 },
                SandboxCall::Spawn {
                    command: "npm install".to_string()
                },
                SandboxCall::Spawn {
                    command: "npm run dev".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn boot_seeds_editor_with_template_contents() {
        let provider = scripted(0).await;
        let (controller, _inputs) = SyncController::new(provider, template(), config());

        assert_ok!(controller.boot().await);
        assert_eq!(controller.editor().value(), "initial");
    }

    #[tokio::test]
    async fn missing_editable_file_fails_before_booting() {
        let provider = scripted(0).await;
        let config = SyncConfig {
            editable_path: "/src/missing.ts".to_string(),
            ..Default::default()
        };
        let (controller, _inputs) = SyncController::new(provider.clone(), template(), config);

        let err = assert_err!(controller.boot().await);
        assert!(matches!(err, Error::TemplateNotFound(_)));
        assert_eq!(controller.state().await, SessionState::Uninitialized);
        assert!(provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn second_boot_is_rejected() {
        let provider = scripted(0).await;
        let (controller, _inputs) = SyncController::new(provider.clone(), template(), config());

        assert_ok!(controller.boot().await);
        let err = assert_err!(controller.boot().await);

        assert!(matches!(err, Error::InvalidState { .. }));
        let boots = provider
            .calls()
            .await
            .into_iter()
            .filter(|c| *c == SandboxCall::Boot)
            .count();
        assert_eq!(boots, 1);
    }

    #[tokio::test]
    async fn second_boot_keeps_user_edit_in_editor() {
        let provider = scripted(0).await;
        let (controller, _inputs) = SyncController::new(provider.clone(), template(), config());
        assert_ok!(controller.boot().await);

        assert!(controller.editor().input("user edit"));
        assert_eq!(
            controller.handle_input("user edit").await.unwrap(),
            EditOutcome::Written
        );
        assert_err!(controller.boot().await);

        assert_eq!(controller.editor().value(), "user edit");
        assert_eq!(provider.file(PATH).await.as_deref(), Some("user edit"));
    }

    #[tokio::test]
    async fn boot_failure_marks_session_failed() {
        let provider = scripted(0).await;
        provider.fail_boot("unsupported browser").await;
        let (controller, _inputs) = SyncController::new(provider, template(), config());

        let err = assert_err!(controller.boot().await);

        assert!(matches!(err, Error::SandboxBoot(_)));
        assert!(matches!(controller.state().await, SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn mount_failure_stops_before_install() {
        let provider = scripted(0).await;
        provider.fail_mount("quota exceeded").await;
        let (controller, _inputs) = SyncController::new(provider.clone(), template(), config());

        let err = assert_err!(controller.boot().await);

        assert!(matches!(err, Error::Mount(_)));
        assert!(provider.spawned().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_boot_times_out() {
        let provider = scripted(0).await;
        provider.set_boot_delay(Duration::from_secs(120)).await;
        let config = config().with_boot_timeout(Duration::from_secs(5));
        let (controller, _inputs) = SyncController::new(provider, template(), config);

        let err = assert_err!(controller.boot().await);
        assert!(matches!(err, Error::Timeout { operation, .. } if operation == "sandbox boot"));
    }

    #[tokio::test]
    async fn sub_second_install_timeout_still_allows_install() {
        let provider = MemorySandboxProvider::new();
        provider
            .script(
                "npm install",
                ScriptedCommand::exits(0, &[]).with_delay(Duration::from_millis(10)),
            )
            .await;
        provider
            .script("npm run dev", ScriptedCommand::long_running())
            .await;
        let config = config().with_install_timeout(Duration::from_millis(500));
        let (controller, _inputs) = SyncController::new(provider, template(), config);

        assert_ok!(controller.boot().await);
        assert_eq!(controller.state().await, SessionState::Ready);
    }

    #[tokio::test]
    async fn queued_edits_flush_in_order_before_ready() {
        let provider = scripted(0).await;
        let (controller, _inputs) = SyncController::new(provider.clone(), template(), config());

        assert_eq!(controller.handle_input("a").await.unwrap(), EditOutcome::Queued);
        assert_eq!(controller.handle_input("ab").await.unwrap(), EditOutcome::Queued);
        assert_ok!(controller.boot().await);

        assert_eq!(
            provider.writes().await,
            vec![
                (PATH.to_string(), "a".to_string()),
                (PATH.to_string(), "ab".to_string()),
            ]
        );
        assert_eq!(provider.file(PATH).await.as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn reject_policy_refuses_early_edits() {
        let provider = scripted(0).await;
        let config = config().with_edit_policy(EditPolicy::Reject);
        let (controller, _inputs) = SyncController::new(provider.clone(), template(), config);

        let err = assert_err!(controller.handle_input("hello").await);
        assert!(matches!(err, Error::NotReady));

        assert_ok!(controller.boot().await);
        assert!(provider.writes().await.is_empty());
    }

    #[tokio::test]
    async fn edits_after_failed_boot_are_invalid() {
        let provider = scripted(1).await;
        let (controller, _inputs) = SyncController::new(provider.clone(), template(), config());

        assert_eq!(controller.handle_input("x").await.unwrap(), EditOutcome::Queued);
        assert_err!(controller.boot().await);

        let err = assert_err!(controller.handle_input("y").await);
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(provider.writes().await.is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_returned_to_caller() {
        let provider = scripted(0).await;
        let (controller, _inputs) = SyncController::new(provider.clone(), template(), config());
        assert_ok!(controller.boot().await);

        provider.fail_writes(Some("disk full")).await;
        let err = assert_err!(controller.handle_input("x").await);
        assert!(matches!(err, Error::Write { .. }));

        provider.fail_writes(None).await;
        assert_eq!(controller.handle_input("y").await.unwrap(), EditOutcome::Written);
    }

    #[tokio::test]
    async fn wait_for_preview_returns_ready_url() {
        let provider = MemorySandboxProvider::new();
        provider
            .script("npm install", ScriptedCommand::exits(0, &[]))
            .await;
        provider
            .script(
                "npm run dev",
                ScriptedCommand::long_running()
                    .with_server_ready(ServerReady::new(4001, "http://localhost:4001")),
            )
            .await;
        let (controller, _inputs) = SyncController::new(provider, template(), config());

        assert_ok!(controller.boot().await);
        let url = assert_ok!(controller.wait_for_preview().await);

        assert_eq!(url, "http://localhost:4001");
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_preview_times_out_without_server() {
        let provider = scripted(0).await;
        let config = config().with_ready_timeout(Duration::from_secs(30));
        let (controller, _inputs) = SyncController::new(provider, template(), config);
        assert_ok!(controller.boot().await);

        let err = assert_err!(controller.wait_for_preview().await);
        assert!(matches!(err, Error::Timeout { operation, .. } if operation == "server ready"));
        assert_eq!(controller.preview().src(), "loading.html");
    }
}
