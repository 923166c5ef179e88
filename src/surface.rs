//! Editable and preview surfaces.
//!
//! The editable surface holds the text being edited and emits an input
//! event per change. The preview surface holds the URL the preview frame
//! shows, starting at a placeholder.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

/// Location the preview shows before any server is ready.
pub const PLACEHOLDER_URL: &str = "loading.html";

/// An input event carrying the surface's full text at the time of the edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub value: String,
}

/// A text surface bound to one file.
pub struct EditableSurface {
    value: watch::Sender<String>,
    events: mpsc::UnboundedSender<InputEvent>,
}

impl EditableSurface {
    /// Creates an empty surface and the receiver for its input events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InputEvent>) {
        let (value, _) = watch::channel(String::new());
        let (events, rx) = mpsc::unbounded_channel();
        (Self { value, events }, rx)
    }

    /// Returns the current text.
    pub fn value(&self) -> String {
        self.value.borrow().clone()
    }

    /// Replaces the text without emitting an input event.
    pub fn set_value(&self, text: impl Into<String>) {
        self.value.send_replace(text.into());
    }

    /// Replaces the text as a user edit and emits an input event.
    ///
    /// Returns false if nobody listens for input events anymore.
    pub fn input(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        self.value.send_replace(text.clone());
        self.events.send(InputEvent { value: text }).is_ok()
    }

    /// Subscribes to text changes.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.value.subscribe()
    }
}

/// The frame showing the dev server.
#[derive(Clone)]
pub struct PreviewSurface {
    src: Arc<watch::Sender<String>>,
    placeholder: String,
}

impl PreviewSurface {
    /// Creates a preview showing `placeholder`.
    pub fn new(placeholder: impl Into<String>) -> Self {
        let placeholder = placeholder.into();
        let (src, _) = watch::channel(placeholder.clone());
        Self {
            src: Arc::new(src),
            placeholder,
        }
    }

    /// Returns the current source URL.
    pub fn src(&self) -> String {
        self.src.borrow().clone()
    }

    /// Returns the placeholder location.
    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Points the preview at `url`.
    pub fn navigate(&self, url: impl Into<String>) {
        self.src.send_replace(url.into());
    }

    /// Returns true once the preview has been pointed at a server.
    pub fn is_serving(&self) -> bool {
        *self.src.borrow() != self.placeholder
    }

    /// Subscribes to source URL changes.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.src.subscribe()
    }
}

impl Default for PreviewSurface {
    fn default() -> Self {
        Self::new(PLACEHOLDER_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_value_does_not_emit_events() {
        let (surface, mut events) = EditableSurface::new();
        surface.set_value("initial");

        assert_eq!(surface.value(), "initial");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn input_emits_full_text() {
        let (surface, mut events) = EditableSurface::new();
        assert!(surface.input("h"));
        assert!(surface.input("hello"));

        assert_eq!(surface.value(), "hello");
        assert_eq!(events.try_recv().unwrap().value, "h");
        assert_eq!(events.try_recv().unwrap().value, "hello");
    }

    #[test]
    fn input_reports_closed_listener() {
        let (surface, events) = EditableSurface::new();
        drop(events);

        assert!(!surface.input("x"));
        assert_eq!(surface.value(), "x");
    }

    #[test]
    fn preview_starts_at_placeholder() {
        let preview = PreviewSurface::default();

        assert_eq!(preview.src(), PLACEHOLDER_URL);
        assert!(!preview.is_serving());

        preview.navigate("http://localhost:3000");
        assert_eq!(preview.src(), "http://localhost:3000");
        assert!(preview.is_serving());
    }

    #[tokio::test]
    async fn preview_clones_share_source() {
        let preview = PreviewSurface::default();
        let mut rx = preview.subscribe();
        let clone = preview.clone();

        clone.navigate("http://localhost:4001");
        rx.changed().await.unwrap();

        assert_eq!(*rx.borrow(), "http://localhost:4001");
        assert_eq!(preview.src(), "http://localhost:4001");
    }
}
