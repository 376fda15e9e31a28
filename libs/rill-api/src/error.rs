use std::fmt;

/// Error kind for plugin errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing configuration field. Permanent, fail at startup.
    Config,
    /// Session could not be opened.
    Connection,
    /// Payload of a single message could not be extracted.
    Message,
    /// Remote write of a single record failed.
    Insert,
    /// Data call made while the output has no live session.
    NotConnected,
    /// Anything else (invalid state, cancellation, generic).
    Logic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Connection => f.write_str("connection"),
            ErrorKind::Message => f.write_str("message"),
            ErrorKind::Insert => f.write_str("insert"),
            ErrorKind::NotConnected => f.write_str("not connected"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Plugin error — returned by all plugin trait methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PluginError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Connection, message: msg.into() }
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Message, message: msg.into() }
    }

    pub fn insert(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Insert, message: msg.into() }
    }

    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::NotConnected, message: msg.into() }
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for PluginError {}

// ---------------------------------------------------------------------------
// Batch-level errors
// ---------------------------------------------------------------------------

/// Per-message failures of a single `write_batch` call.
///
/// Indices refer to positions in the batch that was written. Messages that
/// are not listed were written successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchError {
    failed: Vec<(usize, PluginError)>,
}

impl BatchError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for the message at `index`.
    pub fn failed(&mut self, index: usize, err: PluginError) {
        self.failed.push((index, err));
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    /// Failed indices in the order they were recorded.
    pub fn indices(&self) -> Vec<usize> {
        self.failed.iter().map(|(i, _)| *i).collect()
    }

    pub fn get(&self, index: usize) -> Option<&PluginError> {
        self.failed.iter().find(|(i, _)| *i == index).map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(usize, PluginError)> {
        self.failed.iter()
    }

    /// `Ok(())` when nothing failed, otherwise a partial-failure `WriteError`.
    pub fn into_result(self) -> Result<(), WriteError> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(WriteError::Partial(self))
        }
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} message(s) failed", self.failed.len())?;
        for (i, (index, err)) in self.failed.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}[{index}] {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}

/// Result error of `BatchOutput::write_batch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The whole batch was rejected, nothing was written.
    Batch(PluginError),
    /// Some messages failed, the rest were written.
    Partial(BatchError),
}

impl WriteError {
    /// Indices that must be considered failed for a batch of `len` messages.
    pub fn failed_indices(&self, len: usize) -> Vec<usize> {
        match self {
            WriteError::Batch(_) => (0..len).collect(),
            WriteError::Partial(batch) => batch.indices(),
        }
    }

    /// Whether any failure reports a lost connection, so the host should
    /// connect again before the next write.
    pub fn is_not_connected(&self) -> bool {
        match self {
            WriteError::Batch(e) => e.kind == ErrorKind::NotConnected,
            WriteError::Partial(batch) => batch
                .iter()
                .any(|(_, e)| e.kind == ErrorKind::NotConnected),
        }
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Batch(e) => write!(f, "batch rejected: {e}"),
            WriteError::Partial(e) => write!(f, "partial failure: {e}"),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Batch(e) => Some(e),
            WriteError::Partial(e) => Some(e),
        }
    }
}

impl From<PluginError> for WriteError {
    fn from(e: PluginError) -> Self {
        WriteError::Batch(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_context_keeps_kind() {
        let err = PluginError::insert("timeout").with_context("message 3");
        assert_eq!(err.kind(), ErrorKind::Insert);
        assert_eq!(err.message, "message 3: timeout");
        assert_eq!(err.to_string(), "insert error: message 3: timeout");
    }

    #[test]
    fn empty_batch_error_is_success() {
        assert_eq!(BatchError::new().into_result(), Ok(()));
    }

    #[test]
    fn batch_error_reports_only_recorded_indices() {
        let mut batch = BatchError::new();
        batch.failed(1, PluginError::message("no payload"));
        batch.failed(4, PluginError::insert("rejected"));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.indices(), vec![1, 4]);
        assert_eq!(batch.get(4).map(|e| e.kind()), Some(ErrorKind::Insert));
        assert!(batch.get(0).is_none());
        assert_eq!(
            batch.to_string(),
            "2 message(s) failed: [1] message error: no payload; [4] insert error: rejected"
        );

        let err = batch.into_result().unwrap_err();
        assert_eq!(err.failed_indices(6), vec![1, 4]);
    }

    #[test]
    fn whole_batch_failure_covers_every_index() {
        let err = WriteError::from(PluginError::not_connected("no session"));
        assert_eq!(err.failed_indices(3), vec![0, 1, 2]);
        assert!(err.is_not_connected());
    }

    #[test]
    fn partial_failure_with_lost_session_needs_reconnect() {
        let mut batch = BatchError::new();
        batch.failed(0, PluginError::insert("timed out"));
        assert!(!batch.clone().into_result().unwrap_err().is_not_connected());

        batch.failed(1, PluginError::not_connected("session dropped"));
        assert!(batch.into_result().unwrap_err().is_not_connected());
    }
}
