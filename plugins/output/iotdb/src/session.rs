use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rill_api::error::PluginError;

/// IoTDB series data types, as numbered by the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TsDataType {
    Boolean = 0,
    Int32 = 1,
    Int64 = 2,
    Float = 3,
    Double = 4,
    Text = 5,
}

/// A single measurement value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Text(String),
}

impl FieldValue {
    pub fn data_type(&self) -> TsDataType {
        match self {
            FieldValue::Boolean(_) => TsDataType::Boolean,
            FieldValue::Int32(_) => TsDataType::Int32,
            FieldValue::Int64(_) => TsDataType::Int64,
            FieldValue::Float(_) => TsDataType::Float,
            FieldValue::Double(_) => TsDataType::Double,
            FieldValue::Text(_) => TsDataType::Text,
        }
    }

    /// Append `type byte + big-endian value` to `buf`.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), PluginError> {
        buf.push(self.data_type() as u8);
        match self {
            FieldValue::Boolean(v) => buf.push(u8::from(*v)),
            FieldValue::Int32(v) => buf.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Int64(v) => buf.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Double(v) => buf.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Text(v) => {
                buf.extend_from_slice(&text_len(v.len())?.to_be_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
        }
        Ok(())
    }
}

/// TEXT lengths are i32 on the wire.
fn text_len(len: usize) -> Result<i32, PluginError> {
    i32::try_from(len)
        .map_err(|_| PluginError::insert(format!("text value of {len} bytes is too large")))
}

/// One row for one device: parallel lists of measurements, types and values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub device_id: String,
    pub measurements: Vec<String>,
    pub data_types: Vec<TsDataType>,
    pub values: Vec<FieldValue>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl Record {
    /// Values in the session protocol's binary row layout.
    ///
    /// Fails when the parallel lists disagree in length or a value does not
    /// match its declared type.
    pub fn encode_values(&self) -> Result<Vec<u8>, PluginError> {
        if self.measurements.len() != self.values.len()
            || self.data_types.len() != self.values.len()
        {
            return Err(PluginError::insert(format!(
                "record for '{}': {} measurements, {} types, {} values",
                self.device_id,
                self.measurements.len(),
                self.data_types.len(),
                self.values.len()
            )));
        }

        let mut buf = Vec::new();
        for ((name, ty), value) in self.measurements.iter().zip(&self.data_types).zip(&self.values) {
            if value.data_type() != *ty {
                return Err(PluginError::insert(format!(
                    "measurement '{name}': declared {ty:?}, got {:?}",
                    value.data_type()
                )));
            }
            value.encode(&mut buf)?;
        }
        Ok(buf)
    }
}

/// Where and as whom to open a session.
#[derive(Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    /// Bounds the TCP connect and every request round-trip.
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Session open flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Extra connect attempts after the first failure.
    pub retry_count: u32,
}

/// An open database session.
pub trait Session: Send {
    /// Insert one record.
    fn insert_record<'a>(
        &'a mut self,
        record: &'a Record,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;

    /// Close the session. The session must not be used afterwards.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>>;

    /// `true` once the underlying connection can no longer be trusted, e.g.
    /// after a timed-out call left a reply in flight. A broken session
    /// must be replaced, not reused.
    fn is_broken(&self) -> bool {
        false
    }
}

/// Opens sessions. The seam between the connector and the wire client.
pub trait SessionFactory: Send + Sync {
    fn open<'a>(
        &'a self,
        config: &'a SessionConfig,
        options: OpenOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Session>, PluginError>> + Send + 'a>>;
}
