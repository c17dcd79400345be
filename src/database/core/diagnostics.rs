//! Diagnostics hooks
//!
//! The core calls [`Diagnostics::query`] before every statement it runs and
//! [`Diagnostics::message`] for lifecycle events. Both are always forwarded to
//! `tracing`; the optional caller hooks only receive them when set. Hook
//! delivery is fire-and-forget: a panicking hook is contained here.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback receiving one line of diagnostic text
pub type DiagnosticHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Diagnostics {
    on_query: Option<DiagnosticHook>,
    on_message: Option<DiagnosticHook>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hook receiving raw statement text (newlines folded into spaces)
    pub fn with_query_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_query = Some(Arc::new(hook));
        self
    }

    /// Set the hook receiving diagnostic messages
    pub fn with_message_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(hook));
        self
    }

    pub fn has_hooks(&self) -> bool {
        self.on_query.is_some() || self.on_message.is_some()
    }

    /// Report a statement about to run
    pub fn query(&self, sql: &str) {
        debug!("SQL: {}", sql.trim());
        if let Some(hook) = &self.on_query {
            deliver(hook, &sql.replace('\n', " "));
        }
    }

    /// Report a lifecycle or statement outcome message
    pub fn message(&self, text: &str) {
        info!("{}", text);
        if let Some(hook) = &self.on_message {
            deliver(hook, text);
        }
    }
}

fn deliver(hook: &DiagnosticHook, text: &str) {
    if panic::catch_unwind(AssertUnwindSafe(|| hook(text))).is_err() {
        warn!("diagnostic hook panicked; message dropped");
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("on_query", &self.on_query.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}
