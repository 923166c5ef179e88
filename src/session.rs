//! Session context owning the single sandbox handle.
//!
//! A session moves `Uninitialized -> Booting -> Ready`, or to `Failed` from
//! `Booting` or `Ready`. The sandbox handle is stored once and never
//! replaced.

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::sandbox::Sandbox;

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No boot has been attempted.
    Uninitialized,
    /// The boot sequence is running.
    Booting,
    /// The sandbox is mounted and the dev server has been started.
    Ready,
    /// The boot sequence failed.
    Failed(String),
}

impl SessionState {
    /// Returns true while edits can still become writable.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Booting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Booting => write!(f, "booting"),
            Self::Ready => write!(f, "ready"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

struct Inner<S> {
    state: SessionState,
    sandbox: Option<Arc<S>>,
}

/// Explicit context passed to every operation that needs the sandbox.
pub struct Session<S: Sandbox> {
    inner: RwLock<Inner<S>>,
}

impl<S: Sandbox> Default for Session<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Sandbox> Session<S> {
    /// Creates an uninitialized session.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: SessionState::Uninitialized,
                sandbox: None,
            }),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state.clone()
    }

    /// Moves `Uninitialized -> Booting`.
    pub async fn begin_boot(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != SessionState::Uninitialized {
            return Err(Error::InvalidState {
                operation: "boot".to_string(),
                state: inner.state.to_string(),
            });
        }
        inner.state = SessionState::Booting;
        Ok(())
    }

    /// Stores the acquired sandbox handle. Only legal while booting.
    pub async fn attach(&self, sandbox: Arc<S>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != SessionState::Booting || inner.sandbox.is_some() {
            return Err(Error::InvalidState {
                operation: "attach sandbox".to_string(),
                state: inner.state.to_string(),
            });
        }
        inner.sandbox = Some(sandbox);
        Ok(())
    }

    /// Moves `Booting -> Ready`. A sandbox must be attached.
    pub async fn mark_ready(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != SessionState::Booting || inner.sandbox.is_none() {
            return Err(Error::InvalidState {
                operation: "mark ready".to_string(),
                state: inner.state.to_string(),
            });
        }
        inner.state = SessionState::Ready;
        Ok(())
    }

    /// Moves the session to `Failed`.
    pub async fn fail(&self, reason: impl Into<String>) {
        self.inner.write().await.state = SessionState::Failed(reason.into());
    }

    /// Returns the sandbox handle if the session is ready.
    pub async fn sandbox(&self, operation: &str) -> Result<Arc<S>> {
        let inner = self.inner.read().await;
        match (&inner.state, &inner.sandbox) {
            (SessionState::Ready, Some(sandbox)) => Ok(sandbox.clone()),
            (state, _) => Err(Error::InvalidState {
                operation: operation.to_string(),
                state: state.to_string(),
            }),
        }
    }
}
