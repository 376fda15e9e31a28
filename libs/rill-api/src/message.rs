use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::PluginError;

/// Deferred payload producer. Called each time the bytes are requested.
pub type LoadFn = Arc<dyn Fn() -> Result<Vec<u8>, PluginError> + Send + Sync>;

/// Message content as supplied by the host.
#[derive(Clone)]
pub enum Payload {
    /// Raw bytes — the common case.
    Raw(Vec<u8>),
    /// Structured value, serialized to JSON on demand.
    Structured(serde_json::Value),
    /// Bytes materialized on demand (e.g. a reference into an external
    /// store). Loading may fail.
    Lazy(LoadFn),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Raw(b) => f.debug_tuple("Raw").field(&b.len()).finish(),
            Payload::Structured(v) => f.debug_tuple("Structured").field(v).finish(),
            Payload::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

/// A single message flowing through the pipeline.
///
/// Opaque to the host: outputs decide how to interpret the payload.
#[derive(Debug, Clone)]
pub struct Message {
    payload: Payload,
    metadata: BTreeMap<String, String>,
}

impl Message {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_payload(Payload::Raw(bytes.into()))
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Self::from_payload(Payload::Structured(value))
    }

    pub fn lazy(load: impl Fn() -> Result<Vec<u8>, PluginError> + Send + Sync + 'static) -> Self {
        Self::from_payload(Payload::Lazy(Arc::new(load)))
    }

    pub fn from_payload(payload: Payload) -> Self {
        Self {
            payload,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Payload as raw bytes. Borrowed for raw payloads.
    ///
    /// Fails with a `Message` error when a lazy payload cannot be loaded or
    /// a structured payload cannot be serialized.
    pub fn as_bytes(&self) -> Result<Cow<'_, [u8]>, PluginError> {
        match &self.payload {
            Payload::Raw(b) => Ok(Cow::Borrowed(b.as_slice())),
            Payload::Structured(v) => serde_json::to_vec(v)
                .map(Cow::Owned)
                .map_err(|e| PluginError::message(format!("serialize structured payload: {e}"))),
            Payload::Lazy(load) => load().map(Cow::Owned).map_err(|e| {
                if e.kind == crate::error::ErrorKind::Message {
                    e
                } else {
                    PluginError::message(e.message)
                }
            }),
        }
    }

    /// Size hint used by byte-size batching. Lazy payloads count as zero.
    pub fn size_hint(&self) -> usize {
        match &self.payload {
            Payload::Raw(b) => b.len(),
            Payload::Structured(_) | Payload::Lazy(_) => 0,
        }
    }
}

/// Ordered group of messages handed to `BatchOutput::write_batch`.
pub type MessageBatch = Vec<Message>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn raw_payload_is_borrowed() {
        let msg = Message::new("hello");
        match msg.as_bytes().unwrap() {
            Cow::Borrowed(b) => assert_eq!(b, b"hello"),
            Cow::Owned(_) => panic!("expected borrowed bytes"),
        }
        assert_eq!(msg.size_hint(), 5);
    }

    #[test]
    fn structured_payload_serializes_to_json() {
        let msg = Message::structured(serde_json::json!({"temp": 21}));
        assert_eq!(msg.as_bytes().unwrap().as_ref(), br#"{"temp":21}"#);
    }

    #[test]
    fn failing_lazy_payload_is_a_message_error() {
        let msg = Message::lazy(|| Err(PluginError::logic("blob store unavailable")));
        let err = msg.as_bytes().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Message);
        assert_eq!(err.message, "blob store unavailable");
    }

    #[test]
    fn metadata_is_kept() {
        let msg = Message::new("x").with_metadata("source", "stdin");
        assert_eq!(msg.metadata().get("source").map(String::as_str), Some("stdin"));
    }
}
