//! `iotdb` batch output: writes every message as a text record into Apache
//! IoTDB.

pub mod client;
pub mod config;
pub mod session;
pub mod writer;

use std::sync::Arc;

use rill_api::config::ConfigValues;
use rill_api::error::PluginError;
use rill_api::output::Resources;
use rill_api::registry::{BuiltOutput, OutputRegistry, OutputSpec};

pub use config::IotdbConfig;
pub use writer::IotdbWriter;

/// Registered output type name.
pub const OUTPUT_NAME: &str = "iotdb";

pub fn spec() -> OutputSpec {
    OutputSpec::new(OUTPUT_NAME)
        .summary("Writes messages to an IoTDB database.")
        .description(
            "Each message is inserted as one record into the device \
             `root.bento.messages`, measurement `content`, as TEXT, timestamped \
             with the wall-clock time of the write in milliseconds.",
        )
        .category("Database")
        .params(IotdbConfig::config_params())
}

/// Build the output from validated config. Does not connect.
pub fn from_config(values: &ConfigValues, resources: &Resources) -> Result<BuiltOutput, PluginError> {
    let config = IotdbConfig::from_config(values)?;
    if config.max_in_flight == 0 {
        return Err(PluginError::config("max_in_flight must be at least 1"));
    }
    let batch_policy = config.batching.clone();
    let max_in_flight = config.max_in_flight;

    tracing::debug!(
        output = %resources.label(),
        address = %config.address,
        database = %config.database(),
        timeout = ?config.timeout,
        max_in_flight,
        "iotdb output configured"
    );

    Ok(BuiltOutput {
        output: Arc::new(IotdbWriter::new(config, resources)),
        batch_policy,
        max_in_flight,
    })
}

/// Register the `iotdb` output. Called by the host's composition root.
pub fn register(registry: &OutputRegistry) -> Result<(), PluginError> {
    registry.register_batch_output(spec(), from_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_api::ErrorKind;
    use rill_engine::error::EngineError;
    use rill_engine::plugin_host::resolve_config;
    use serde_json::json;
    use std::time::Duration;

    fn values(config: serde_json::Value) -> Result<ConfigValues, EngineError> {
        resolve_config(&spec().params, Some(&config))
    }

    fn build(config: serde_json::Value) -> Result<IotdbConfig, EngineError> {
        Ok(IotdbConfig::from_config(&values(config)?)?)
    }

    #[test]
    fn registers_under_iotdb() {
        let registry = OutputRegistry::new();
        register(&registry).unwrap();
        assert!(registry.contains("iotdb"));
        assert!(register(&registry).is_err());

        let spec = registry.get("iotdb").unwrap().spec;
        assert_eq!(spec.categories, vec!["Database".to_string()]);
        assert!(spec.params.iter().any(|p| p.name == "password" && p.secret));
    }

    #[test]
    fn omitted_fields_take_defaults() {
        let config = build(json!({})).unwrap();
        assert_eq!(config.address, "localhost:6667");
        assert_eq!(config.username, "root");
        assert_eq!(config.password, "root");
        assert_eq!(config.database(), "");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_in_flight, 64);
    }

    #[test]
    fn timeout_string_is_parsed() {
        let config = build(json!({ "timeout": "15s" })).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(15));
    }

    #[test]
    fn malformed_timeout_is_a_config_error() {
        let err = build(json!({ "timeout": "fifteen" })).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)), "{err}");
    }

    #[test]
    fn explicit_credentials_round_trip() {
        let values =
            values(json!({ "address": "127.0.0.1:7777", "username": "admin", "password": "admin" }))
                .unwrap();
        let built = from_config(&values, &Resources::mock()).unwrap();
        assert_eq!(built.max_in_flight, 64);
        assert!(built.batch_policy.is_noop());

        let writer = IotdbWriter::new(IotdbConfig::from_config(&values).unwrap(), &Resources::mock());
        assert_eq!(writer.address(), "127.0.0.1:7777");
        assert_eq!(writer.username(), "admin");
        assert_eq!(writer.password(), "admin");
        assert_eq!(writer.database(), "");
    }

    #[test]
    fn batching_and_max_in_flight_are_resolved() {
        let values = values(json!({
            "max_in_flight": 4,
            "batching": { "count": 100, "period": "1s" },
            "database": "root.sg"
        }))
        .unwrap();
        let built = from_config(&values, &Resources::mock()).unwrap();
        assert_eq!(built.max_in_flight, 4);
        assert_eq!(built.batch_policy.count, 100);
        assert_eq!(built.batch_policy.period, Some(Duration::from_secs(1)));
    }

    #[test]
    fn zero_max_in_flight_is_rejected() {
        let values = values(json!({ "max_in_flight": 0 })).unwrap();
        let err = from_config(&values, &Resources::mock()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn structured_values_for_string_fields_are_config_errors() {
        let err = build(json!({ "address": ["db", 6667] })).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)), "{err}");
        assert!(err.to_string().contains("address"), "{err}");

        let err = build(json!({ "password": { "k": 1 } })).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)), "{err}");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = build(json!({ "adress": "typo:1" })).unwrap_err();
        assert!(err.to_string().contains("adress"), "{err}");
    }
}
