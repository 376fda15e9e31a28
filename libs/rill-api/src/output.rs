use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::error::{PluginError, WriteError};
use crate::message::MessageBatch;

/// Shared resources handed to an output factory.
///
/// `span` is the output's logging scope: outputs instrument their futures
/// with it so every event carries the output name.
#[derive(Debug, Clone)]
pub struct Resources {
    label: String,
    span: tracing::Span,
}

impl Resources {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let span = tracing::info_span!("output", name = %label);
        Self { label, span }
    }

    /// Resources for tests and tools: no parent span.
    pub fn mock() -> Self {
        Self::new("mock")
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Batch output — the host-side contract of an output plugin.
///
/// Lifecycle: `connect` once → `write_batch` repeatedly → `close` once.
/// The host may call `write_batch` concurrently (up to the output's
/// `max_in_flight`), so all methods take `&self`.
pub trait BatchOutput: Send + Sync {
    /// Establish the connection to the destination.
    ///
    /// Not retried by the output; the host decides whether to retry.
    fn connect<'a>(
        &'a self,
        token: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;

    /// Write a batch. Failures of single messages are reported as
    /// `WriteError::Partial` with the failed indices; the other messages
    /// are written.
    fn write_batch<'a>(
        &'a self,
        batch: &'a MessageBatch,
        token: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), WriteError>> + Send + 'a>>;

    /// Release the connection. Must be a no-op when not connected and safe
    /// to call more than once.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>>;
}
