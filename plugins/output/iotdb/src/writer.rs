use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rill_api::error::{BatchError, PluginError, WriteError};
use rill_api::message::MessageBatch;
use rill_api::output::{BatchOutput, Resources};
use rill_api::util::now_ms;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::client::TcpSessionFactory;
use crate::config::IotdbConfig;
use crate::session::{
    FieldValue, OpenOptions, Record, Session, SessionConfig, SessionFactory, TsDataType,
};

/// Device every message is written to.
pub const DEVICE_ID: &str = "root.bento.messages";
/// The single measurement holding the message content.
pub const MEASUREMENT: &str = "content";

const FALLBACK_HOST: &str = "localhost";
const FALLBACK_PORT: &str = "6667";

/// Split `host:port`.
///
/// Anything but exactly two non-empty parts falls back to
/// `localhost:6667`, including IPv6 literals and addresses without a port.
pub fn split_address(address: &str) -> (&str, &str) {
    let mut parts = address.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) if !host.is_empty() && !port.is_empty() => (host, port),
        _ => (FALLBACK_HOST, FALLBACK_PORT),
    }
}

/// The record written for one message payload.
pub fn build_record(content: &[u8], timestamp: i64) -> Record {
    Record {
        device_id: DEVICE_ID.to_string(),
        measurements: vec![MEASUREMENT.to_string()],
        data_types: vec![TsDataType::Text],
        values: vec![FieldValue::Text(String::from_utf8_lossy(content).into_owned())],
        timestamp,
    }
}

enum State {
    Unconnected,
    Connected(Box<dyn Session>),
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Unconnected => "unconnected",
            State::Connected(_) => "connected",
            State::Closed => "closed",
        }
    }
}

/// Batch output writing each message as one IoTDB record.
///
/// Unconnected → Connected → Closed. The session is shared by concurrent
/// `write_batch` calls; each insert holds the session lock.
pub struct IotdbWriter {
    config: IotdbConfig,
    factory: Arc<dyn SessionFactory>,
    state: Mutex<State>,
    span: tracing::Span,
}

impl IotdbWriter {
    /// Writer speaking the native session protocol. No I/O happens here.
    pub fn new(config: IotdbConfig, resources: &Resources) -> Self {
        Self::with_session_factory(config, Arc::new(TcpSessionFactory), resources)
    }

    pub fn with_session_factory(
        config: IotdbConfig,
        factory: Arc<dyn SessionFactory>,
        resources: &Resources,
    ) -> Self {
        Self {
            config,
            factory,
            state: Mutex::new(State::Unconnected),
            span: resources.span().clone(),
        }
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn password(&self) -> &str {
        &self.config.password
    }

    /// Configured database, empty when unset.
    pub fn database(&self) -> &str {
        self.config.database()
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, State::Connected(_))
    }

    fn session_config(&self) -> SessionConfig {
        let (host, port) = split_address(&self.config.address);
        SessionConfig {
            host: host.to_string(),
            port: port.to_string(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            timeout: self.config.timeout,
        }
    }

    /// Insert one record under the session lock.
    ///
    /// A session that breaks during the insert is dropped; later inserts
    /// fail as not connected until the host connects again.
    async fn insert(&self, record: &Record) -> Result<(), PluginError> {
        let mut state = self.state.lock().await;
        let result = match &mut *state {
            State::Connected(session) => {
                let result = session.insert_record(record).await;
                if !session.is_broken() {
                    return result;
                }
                result
            }
            other => {
                return Err(PluginError::not_connected(format!(
                    "iotdb output is {}",
                    other.name()
                )));
            }
        };
        tracing::warn!("IoTDB session broken, dropping it until the next connect");
        *state = State::Unconnected;
        result
    }
}

impl BatchOutput for IotdbWriter {
    fn connect<'a>(
        &'a self,
        token: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(
            async move {
                let mut state = self.state.lock().await;
                match &*state {
                    State::Connected(session) if !session.is_broken() => return Ok(()),
                    State::Connected(_) => {
                        tracing::warn!("replacing broken IoTDB session");
                    }
                    State::Closed => {
                        return Err(PluginError::logic("iotdb output is closed"));
                    }
                    State::Unconnected => {}
                }

                let session_config = self.session_config();
                let endpoint = session_config.endpoint();
                let options = OpenOptions { retry_count: 0 };

                let opened = tokio::select! {
                    _ = token.cancelled() => Err(PluginError::connection("connect cancelled")),
                    r = self.factory.open(&session_config, options) => r,
                };

                match opened {
                    Ok(session) => {
                        *state = State::Connected(session);
                        tracing::info!(
                            endpoint = %endpoint,
                            username = %self.config.username,
                            database = %self.database(),
                            "connected to IoTDB"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        *state = State::Unconnected;
                        tracing::error!(endpoint = %endpoint, error = %e, "failed to connect to IoTDB");
                        match e.kind() {
                            rill_api::ErrorKind::Connection => Err(e),
                            _ => Err(PluginError::connection(e.message)),
                        }
                    }
                }
            }
            .instrument(self.span.clone()),
        )
    }

    fn write_batch<'a>(
        &'a self,
        batch: &'a MessageBatch,
        token: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), WriteError>> + Send + 'a>> {
        Box::pin(
            async move {
                {
                    let state = self.state.lock().await;
                    if !matches!(*state, State::Connected(_)) {
                        return Err(WriteError::Batch(PluginError::not_connected(format!(
                            "iotdb output is {}",
                            state.name()
                        ))));
                    }
                }

                let mut errors = BatchError::new();
                for (index, msg) in batch.iter().enumerate() {
                    if token.is_cancelled() {
                        errors.failed(index, PluginError::logic("cancelled"));
                        continue;
                    }

                    let content = match msg.as_bytes() {
                        Ok(content) => content,
                        Err(e) => {
                            tracing::error!(index, error = %e, "failed to read message content");
                            errors.failed(index, e);
                            continue;
                        }
                    };

                    let record = build_record(&content, now_ms());
                    match self.insert(&record).await {
                        Ok(()) => {
                            tracing::debug!(index, bytes = content.len(), "wrote message to IoTDB");
                        }
                        Err(e) => {
                            tracing::error!(index, error = %e, "failed to write message to IoTDB");
                            errors.failed(index, e);
                        }
                    }
                }

                if !errors.is_empty() {
                    tracing::warn!(
                        failed = errors.len(),
                        total = batch.len(),
                        "batch partially written"
                    );
                }
                errors.into_result()
            }
            .instrument(self.span.clone()),
        )
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        Box::pin(
            async move {
                let mut state = self.state.lock().await;
                match std::mem::replace(&mut *state, State::Closed) {
                    State::Connected(mut session) => {
                        if let Err(e) = session.close().await {
                            tracing::warn!(error = %e, "error closing IoTDB session");
                        }
                        tracing::info!("IoTDB connection closed");
                    }
                    State::Unconnected | State::Closed => {
                        tracing::debug!("close without an open session");
                    }
                }
                Ok(())
            }
            .instrument(self.span.clone()),
        )
    }
}
