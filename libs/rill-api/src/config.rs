use std::time::Duration;

use crate::batch::BatchPolicy;
use crate::error::PluginError;

/// Default `max_in_flight` for batch outputs.
pub const DEFAULT_MAX_IN_FLIGHT: u64 = 64;

/// Parameter type for plugin configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    I64,
    U64,
    F64,
    Str,
    /// `"10s"`, `"1m30s"`, `"250ms"` or integer milliseconds.
    Duration,
    /// Object `{ count, byte_size, period }`.
    BatchPolicy,
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamType::Bool => f.write_str("bool"),
            ParamType::I64 => f.write_str("int"),
            ParamType::U64 => f.write_str("uint"),
            ParamType::F64 => f.write_str("float"),
            ParamType::Str => f.write_str("string"),
            ParamType::Duration => f.write_str("duration"),
            ParamType::BatchPolicy => f.write_str("batch policy"),
        }
    }
}

/// Declaration of a single config parameter.
///
/// Plugins declare these in their `OutputSpec`.
/// The engine uses them to validate config values BEFORE creating the plugin.
#[derive(Debug, Clone)]
pub struct ConfigParam {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    /// Optional params have no default: absent stays absent.
    pub optional: bool,
    /// Value must never be printed (logs, docs).
    pub secret: bool,
    pub advanced: bool,
    pub default: Option<ParamValue>,
    pub example: Option<String>,
    pub description: String,
}

impl ConfigParam {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            optional: false,
            secret: false,
            advanced: false,
            default: None,
            example: None,
            description: String::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn default_value(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Standard `max_in_flight` field of batch outputs.
    pub fn max_in_flight() -> Self {
        Self::new("max_in_flight", ParamType::U64)
            .description("Maximum number of batches written in parallel.")
            .default_value(ParamValue::U64(DEFAULT_MAX_IN_FLIGHT))
    }

    /// Standard batching policy field of batch outputs.
    pub fn batch_policy(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::BatchPolicy)
            .description("Conditions that flush a batch of messages to the output.")
            .default_value(ParamValue::BatchPolicy(BatchPolicy::default()))
    }
}

/// Typed config value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Duration(Duration),
    BatchPolicy(BatchPolicy),
}

/// Validated config values, passed to plugin at creation time.
///
/// Engine builds this from the config source (TOML, YAML, ...)
/// after validating against plugin's `ConfigParam` declarations.
/// Plugin reads values via typed getters — no parsing needed.
#[derive(Debug, Clone, Default)]
pub struct ConfigValues {
    entries: Vec<(String, ParamValue)>,
}

impl ConfigValues {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == &name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Whether the param has a value (explicit or default).
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParamValue::I64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(ParamValue::U64(v)) => Some(*v),
            // Most config formats lack unsigned integers — accept non-negative i64.
            Some(ParamValue::I64(v)) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(ParamValue::F64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParamValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_duration(&self, name: &str) -> Option<Duration> {
        match self.get(name) {
            Some(ParamValue::Duration(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_batch_policy(&self, name: &str) -> Option<&BatchPolicy> {
        match self.get(name) {
            Some(ParamValue::BatchPolicy(v)) => Some(v),
            _ => None,
        }
    }

    /// Standard `max_in_flight` value, validated to be at least 1.
    pub fn max_in_flight(&self) -> Result<usize, PluginError> {
        let n = self.get_u64("max_in_flight").unwrap_or(DEFAULT_MAX_IN_FLIGHT);
        if n == 0 {
            return Err(PluginError::config("max_in_flight must be at least 1"));
        }
        Ok(n as usize)
    }
}

/// Parse a duration string: a sequence of `<number><unit>` pairs,
/// units `ns`, `us`, `ms`, `s`, `m`, `h` (e.g. `"10s"`, `"1m30s"`, `"1.5s"`).
/// A bare `"0"` is accepted.
pub fn parse_duration(s: &str) -> Result<Duration, PluginError> {
    let input = s.trim();
    if input.is_empty() {
        return Err(PluginError::config("empty duration"));
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| PluginError::config(format!("duration '{input}': missing unit")))?;
        if num_len == 0 {
            return Err(PluginError::config(format!("duration '{input}': expected number")));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| PluginError::config(format!("duration '{input}': invalid number")))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            other => {
                return Err(PluginError::config(format!(
                    "duration '{input}': unknown unit '{other}'"
                )));
            }
        };
        total += value * nanos_per_unit;
        rest = &rest[unit_len..];
    }

    Ok(Duration::from_nanos(total.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_go_style_durations() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_malformed_durations() {
        for bad in ["", "10", "s", "10x", "ten seconds", "1..5s"] {
            let err = parse_duration(bad).unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::Config, "input {bad:?}");
        }
    }

    #[test]
    fn u64_getter_accepts_non_negative_i64() {
        let mut values = ConfigValues::new();
        values.set("a", ParamValue::I64(7));
        values.set("b", ParamValue::I64(-1));
        assert_eq!(values.get_u64("a"), Some(7));
        assert_eq!(values.get_u64("b"), None);
    }

    #[test]
    fn set_replaces_existing_entry() {
        let mut values = ConfigValues::new();
        values.set("address", ParamValue::Str("a:1".into()));
        values.set("address", ParamValue::Str("b:2".into()));
        assert_eq!(values.get_str("address"), Some("b:2"));
        assert!(values.contains("address"));
        assert!(!values.contains("database"));
    }

    #[test]
    fn max_in_flight_defaults_and_rejects_zero() {
        let mut values = ConfigValues::new();
        assert_eq!(values.max_in_flight().unwrap(), 64);
        values.set("max_in_flight", ParamValue::U64(0));
        assert!(values.max_in_flight().is_err());
        values.set("max_in_flight", ParamValue::U64(4));
        assert_eq!(values.max_in_flight().unwrap(), 4);
    }
}
