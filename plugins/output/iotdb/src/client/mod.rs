//! Native IoTDB session client: Thrift binary protocol over a framed TCP
//! transport.

mod thrift;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rill_api::error::PluginError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::session::{OpenOptions, Record, Session, SessionConfig, SessionFactory};
use thrift::{Decoder, Encoder, MSG_CALL, MSG_EXCEPTION, MSG_REPLY};

/// Session protocol version V3.
const PROTOCOL_V3: i32 = 2;
/// Upper bound for a single response frame.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const STATUS_SUCCESS: i32 = 200;
const STATUS_REDIRECTION_RECOMMEND: i32 = 400;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("server status {code}: {message}")]
    Status { code: i32, message: String },

    #[error("server exception (type {kind}): {message}")]
    Application { kind: i32, message: String },

    #[error("encode: {0}")]
    Encode(String),

    #[error("connection is broken by an earlier failure")]
    Broken,
}

impl ClientError {
    /// Whether the stream may hold a partial frame or an unread reply after
    /// this error. Such a connection cannot carry another call.
    fn breaks_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout(_) | ClientError::Protocol(_) | ClientError::Broken
        )
    }
}

/// Run `fut` bounded by `timeout`. A zero timeout means unbounded.
async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ClientError::Timeout(timeout))?
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> Result<(), ClientError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| ClientError::Protocol(format!("frame too large: {} bytes", payload.len())))?;
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, ClientError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ClientError::Protocol(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }
    let mut frame = vec![0u8; len];
    r.read_exact(&mut frame).await?;
    Ok(frame)
}

/// Result status of a session RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Status {
    code: i32,
    message: String,
}

impl Status {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ClientError> {
        let mut status = Status::default();
        while let Some((ty, id)) = dec.field()? {
            match (id, ty) {
                (1, thrift::T_I32) => status.code = dec.read_i32()?,
                (2, thrift::T_STRING) => status.message = dec.read_string()?,
                _ => dec.skip(ty)?,
            }
        }
        Ok(status)
    }

    fn check(self) -> Result<(), ClientError> {
        match self.code {
            STATUS_SUCCESS | STATUS_REDIRECTION_RECOMMEND => Ok(()),
            code => Err(ClientError::Status {
                code,
                message: self.message,
            }),
        }
    }
}

/// Decode the reply header of `frame` and position the decoder at the
/// result struct.
fn reply_body<'a>(frame: &'a [u8], method: &str, seq_id: i32) -> Result<Decoder<'a>, ClientError> {
    let mut dec = Decoder::new(frame);
    let header = dec.message_begin()?;
    if header.msg_type == MSG_EXCEPTION {
        let mut message = String::new();
        let mut kind = 0;
        while let Some((ty, id)) = dec.field()? {
            match (id, ty) {
                (1, thrift::T_STRING) => message = dec.read_string()?,
                (2, thrift::T_I32) => kind = dec.read_i32()?,
                _ => dec.skip(ty)?,
            }
        }
        return Err(ClientError::Application { kind, message });
    }
    if header.msg_type != MSG_REPLY {
        return Err(ClientError::Protocol(format!(
            "unexpected message type {} for {method}",
            header.msg_type
        )));
    }
    if header.name != method || header.seq_id != seq_id {
        return Err(ClientError::Protocol(format!(
            "reply {}#{} does not match call {method}#{seq_id}",
            header.name, header.seq_id
        )));
    }
    Ok(dec)
}

/// Read the `success` field (id 0) of a result struct with `read`.
fn read_success<'a, T>(
    dec: &mut Decoder<'a>,
    method: &str,
    read: impl FnOnce(&mut Decoder<'a>) -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    let mut read = Some(read);
    let mut value = None;
    while let Some((ty, id)) = dec.field()? {
        match (id, ty, read.take()) {
            (0, thrift::T_STRUCT, Some(f)) => value = Some(f(dec)?),
            (_, _, f) => {
                read = f;
                dec.skip(ty)?;
            }
        }
    }
    value.ok_or_else(|| ClientError::Protocol(format!("{method}: reply has no result")))
}

/// One framed connection. Calls are strictly sequential.
///
/// After a transport, timeout or protocol failure the connection is marked
/// broken and every later call fails with [`ClientError::Broken`].
struct Connection {
    stream: TcpStream,
    seq_id: i32,
    timeout: Duration,
    broken: bool,
}

impl Connection {
    async fn connect(endpoint: &str, timeout: Duration) -> Result<Self, ClientError> {
        let stream = with_timeout(timeout, async {
            TcpStream::connect(endpoint).await.map_err(ClientError::from)
        })
        .await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            seq_id: 0,
            timeout,
            broken: false,
        })
    }

    /// Mark the connection broken when `result` failed in a way that
    /// desynchronizes the stream.
    fn track<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(e) = &result {
            if e.breaks_connection() {
                self.broken = true;
            }
        }
        result
    }

    /// Send `method` with arguments written by `args` and return the raw
    /// reply frame together with the call's sequence id.
    async fn call(
        &mut self,
        method: &str,
        args: impl FnOnce(&mut Encoder) -> Result<(), ClientError>,
    ) -> Result<(Vec<u8>, i32), ClientError> {
        if self.broken {
            return Err(ClientError::Broken);
        }

        let mut enc = Encoder::new();
        let seq_id = self.seq_id.wrapping_add(1);
        enc.message_begin(method, MSG_CALL, seq_id)?;
        args(&mut enc)?;
        let payload = enc.into_bytes();
        self.seq_id = seq_id;

        let stream = &mut self.stream;
        let frame = with_timeout(self.timeout, async move {
            write_frame(&mut *stream, &payload).await?;
            read_frame(&mut *stream).await
        })
        .await;
        Ok((self.track(frame)?, seq_id))
    }

    async fn open_session(&mut self, username: &str, password: &str) -> Result<i64, ClientError> {
        let (frame, seq_id) = self
            .call("openSession", |enc| {
                enc.field(thrift::T_STRUCT, 1);
                enc.field(thrift::T_I32, 1);
                enc.write_i32(PROTOCOL_V3);
                enc.field(thrift::T_STRING, 2);
                enc.write_string("UTC")?;
                enc.field(thrift::T_STRING, 3);
                enc.write_string(username)?;
                enc.field(thrift::T_STRING, 4);
                enc.write_string(password)?;
                enc.field(thrift::T_MAP, 5);
                enc.map_begin(thrift::T_STRING, thrift::T_STRING, 1)?;
                enc.write_string("sql_dialect")?;
                enc.write_string("tree")?;
                enc.stop();
                enc.stop();
                Ok(())
            })
            .await?;

        let mut dec = reply_body(&frame, "openSession", seq_id)?;
        let (status, session_id) = read_success(&mut dec, "openSession", |dec| {
            let mut status = None;
            let mut session_id = None;
            while let Some((ty, id)) = dec.field()? {
                match (id, ty) {
                    (1, thrift::T_STRUCT) => status = Some(Status::decode(dec)?),
                    (2, thrift::T_I32) => {
                        let version = dec.read_i32()?;
                        if version != PROTOCOL_V3 {
                            tracing::debug!(version, "server uses a different protocol version");
                        }
                    }
                    (3, thrift::T_I64) => session_id = Some(dec.read_i64()?),
                    _ => dec.skip(ty)?,
                }
            }
            Ok((status, session_id))
        })?;

        status
            .ok_or_else(|| ClientError::Protocol("openSession: reply has no status".into()))?
            .check()?;
        session_id.ok_or_else(|| ClientError::Protocol("openSession: reply has no session id".into()))
    }

    async fn insert_record(&mut self, session_id: i64, record: &Record) -> Result<(), ClientError> {
        let values = record
            .encode_values()
            .map_err(|e| ClientError::Encode(e.message))?;

        let (frame, seq_id) = self
            .call("insertRecord", |enc| {
                enc.field(thrift::T_STRUCT, 1);
                enc.field(thrift::T_I64, 1);
                enc.write_i64(session_id);
                enc.field(thrift::T_STRING, 2);
                enc.write_string(&record.device_id)?;
                enc.field(thrift::T_LIST, 3);
                enc.list_begin(thrift::T_STRING, record.measurements.len())?;
                for m in &record.measurements {
                    enc.write_string(m)?;
                }
                enc.field(thrift::T_STRING, 4);
                enc.write_binary(&values)?;
                enc.field(thrift::T_I64, 5);
                enc.write_i64(record.timestamp);
                enc.stop();
                enc.stop();
                Ok(())
            })
            .await?;

        let status = reply_body(&frame, "insertRecord", seq_id)
            .and_then(|mut dec| read_success(&mut dec, "insertRecord", Status::decode));
        self.track(status)?.check()
    }

    async fn close_session(&mut self, session_id: i64) -> Result<(), ClientError> {
        let (frame, seq_id) = self
            .call("closeSession", |enc| {
                enc.field(thrift::T_STRUCT, 1);
                enc.field(thrift::T_I64, 1);
                enc.write_i64(session_id);
                enc.stop();
                enc.stop();
                Ok(())
            })
            .await?;

        let mut dec = reply_body(&frame, "closeSession", seq_id)?;
        read_success(&mut dec, "closeSession", Status::decode)?.check()?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Session over a single TCP connection.
pub struct TcpSession {
    conn: Connection,
    session_id: i64,
    endpoint: String,
    closed: bool,
}

impl TcpSession {
    pub fn session_id(&self) -> i64 {
        self.session_id
    }
}

impl Session for TcpSession {
    fn insert_record<'a>(
        &'a mut self,
        record: &'a Record,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            if self.closed {
                return Err(PluginError::not_connected("session is closed"));
            }
            match self.conn.insert_record(self.session_id, record).await {
                Ok(()) => Ok(()),
                Err(ClientError::Broken) => Err(PluginError::connection(format!(
                    "session at {} is broken",
                    self.endpoint
                ))),
                Err(e) => {
                    if self.conn.broken {
                        tracing::warn!(
                            endpoint = %self.endpoint,
                            session_id = self.session_id,
                            error = %e,
                            "session connection broken"
                        );
                    }
                    Err(PluginError::insert(format!(
                        "insert into '{}': {e}",
                        record.device_id
                    )))
                }
            }
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            self.conn
                .close_session(self.session_id)
                .await
                .map_err(|e| PluginError::connection(format!("close session at {}: {e}", self.endpoint)))
        })
    }

    fn is_broken(&self) -> bool {
        self.conn.broken
    }
}

/// Opens [`TcpSession`]s against a single IoTDB node.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpSessionFactory;

impl TcpSessionFactory {
    async fn open_once(config: &SessionConfig) -> Result<TcpSession, ClientError> {
        let endpoint = config.endpoint();
        let mut conn = Connection::connect(&endpoint, config.timeout).await?;
        let session_id = conn.open_session(&config.username, &config.password).await?;
        Ok(TcpSession {
            conn,
            session_id,
            endpoint,
            closed: false,
        })
    }
}

impl SessionFactory for TcpSessionFactory {
    fn open<'a>(
        &'a self,
        config: &'a SessionConfig,
        options: OpenOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Session>, PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let endpoint = config.endpoint();
            let mut attempt = 0;
            loop {
                match Self::open_once(config).await {
                    Ok(session) => {
                        tracing::debug!(
                            endpoint = %endpoint,
                            session_id = session.session_id,
                            "session opened"
                        );
                        return Ok(Box::new(session) as Box<dyn Session>);
                    }
                    Err(e) if attempt < options.retry_count => {
                        attempt += 1;
                        tracing::warn!(endpoint = %endpoint, attempt, error = %e, "open session failed, retrying");
                    }
                    Err(e) => {
                        return Err(PluginError::connection(format!(
                            "open session at {endpoint}: {e}"
                        )));
                    }
                }
            }
        })
    }
}
