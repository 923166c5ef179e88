//! Dev-server lifecycle pipeline.
//!
//! [`start`] spawns the dev server inside a sandbox without waiting for it
//! to finish. A background task publishes its lifecycle as
//! [`DevServerEvent`]s on a single-consumer channel; [`drive_preview`]
//! consumes that channel and points the preview at every ready server.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::CommandSpec;
use crate::error::Result;
use crate::sandbox::{ProcessOutput, Sandbox, SandboxProcess, ServerReady};
use crate::surface::PreviewSurface;

const EVENT_CAPACITY: usize = 256;

/// Lifecycle event of the dev server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevServerEvent {
    /// The command was spawned.
    Started { command: String },
    /// The process printed a line.
    Output(ProcessOutput),
    /// The sandbox reported a server ready to be previewed.
    Ready(ServerReady),
    /// The process exited.
    Exited(i32),
}

/// A started dev server.
pub struct DevServer {
    /// Lifecycle events, in the order they happened.
    pub events: mpsc::Receiver<DevServerEvent>,
    /// Task publishing the events.
    pub task: JoinHandle<()>,
}

/// Subscribes to server-ready notifications, then spawns the dev server.
///
/// Subscribing first means a server that announces itself immediately is
/// never missed.
pub async fn start<S: Sandbox + 'static>(
    sandbox: Arc<S>,
    command: &CommandSpec,
) -> Result<DevServer> {
    let ready = sandbox.subscribe_server_ready();
    let process = sandbox.spawn(&command.program, &command.args).await?;

    let (tx, events) = mpsc::channel(EVENT_CAPACITY);
    let task = tokio::spawn(publish(process, ready, tx));

    Ok(DevServer { events, task })
}

async fn publish(
    process: SandboxProcess,
    mut ready: broadcast::Receiver<ServerReady>,
    tx: mpsc::Sender<DevServerEvent>,
) {
    let (command, mut output, mut exit) = process.into_parts();
    if tx.send(DevServerEvent::Started { command }).await.is_err() {
        return;
    }

    let mut output_open = true;
    let mut exited = false;
    let mut ready_open = true;

    loop {
        let event = tokio::select! {
            line = output.recv(), if output_open => match line {
                Some(line) => DevServerEvent::Output(line),
                None => {
                    output_open = false;
                    continue;
                }
            },
            code = &mut exit, if !exited => {
                exited = true;
                match code {
                    Ok(code) => DevServerEvent::Exited(code),
                    Err(_) => {
                        tracing::warn!("dev server ended without reporting an exit code");
                        DevServerEvent::Exited(-1)
                    }
                }
            },
            notice = ready.recv(), if ready_open => match notice {
                Ok(notice) => DevServerEvent::Ready(notice),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed server-ready notifications");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    ready_open = false;
                    continue;
                }
            },
            else => break,
        };

        if tx.send(event).await.is_err() {
            tracing::debug!("dev server event consumer dropped");
            return;
        }
    }
}

/// Consumes dev-server events, navigating the preview on every `Ready`.
///
/// Runs until the event channel closes.
pub async fn drive_preview(mut events: mpsc::Receiver<DevServerEvent>, preview: PreviewSurface) {
    while let Some(event) = events.recv().await {
        match event {
            DevServerEvent::Started { command } => {
                tracing::info!(command = %command, "dev server started");
            }
            DevServerEvent::Output(ProcessOutput::Stdout(line)) => {
                tracing::info!(target: "dev_server", "{}", line);
            }
            DevServerEvent::Output(ProcessOutput::Stderr(line)) => {
                tracing::warn!(target: "dev_server", "{}", line);
            }
            DevServerEvent::Ready(ready) => {
                tracing::info!(port = ready.port, url = %ready.url, "server ready, updating preview");
                preview.navigate(ready.url);
            }
            DevServerEvent::Exited(0) => {
                tracing::info!("dev server exited");
            }
            DevServerEvent::Exited(code) => {
                tracing::warn!(exit_code = code, "dev server exited with failure");
            }
        }
    }
}
