use std::fmt;
use std::time::Duration;

use rill_api::config::DEFAULT_MAX_IN_FLIGHT;
use rill_api::{BatchPolicy, ConfigParams};

/// Configuration of the `iotdb` output.
#[derive(ConfigParams, Clone)]
pub struct IotdbConfig {
    #[param(description = "Maximum number of batches written in parallel.")]
    pub max_in_flight: usize,

    #[param(description = "Conditions that flush a batch of messages to the output.")]
    pub batching: BatchPolicy,

    #[param(description = "IoTDB server address as host:port.", example = "localhost:6667")]
    pub address: String,

    #[param(description = "User name.")]
    pub username: String,

    #[param(secret, description = "Password.")]
    pub password: String,

    #[param(optional, description = "Database name.", example = "root.demo")]
    pub database: Option<String>,

    #[param(advanced, description = "Connection timeout.")]
    pub timeout: Duration,
}

impl Default for IotdbConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT as usize,
            batching: BatchPolicy::default(),
            address: "localhost:6667".to_string(),
            username: "root".to_string(),
            password: "root".to_string(),
            database: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl IotdbConfig {
    /// Configured database, empty when unset.
    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for IotdbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IotdbConfig")
            .field("max_in_flight", &self.max_in_flight)
            .field("batching", &self.batching)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_api::config::{ConfigValues, ParamType, ParamValue};

    #[test]
    fn declared_params() {
        let params = IotdbConfig::config_params();
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "max_in_flight",
                "batching",
                "address",
                "username",
                "password",
                "database",
                "timeout"
            ]
        );

        let password = &params[4];
        assert!(password.secret);
        assert_eq!(password.default, Some(ParamValue::Str("root".into())));

        let database = &params[5];
        assert!(database.optional);
        assert_eq!(database.default, None);
        assert_eq!(database.example.as_deref(), Some("root.demo"));

        let timeout = &params[6];
        assert_eq!(timeout.param_type, ParamType::Duration);
        assert!(timeout.advanced);
        assert_eq!(
            timeout.default,
            Some(ParamValue::Duration(Duration::from_secs(10)))
        );
    }

    #[test]
    fn empty_config_yields_defaults() {
        let config = IotdbConfig::from_config(&ConfigValues::new()).unwrap();
        assert_eq!(config.address, "localhost:6667");
        assert_eq!(config.username, "root");
        assert_eq!(config.password, "root");
        assert_eq!(config.database, None);
        assert_eq!(config.database(), "");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_in_flight, 64);
        assert!(config.batching.is_noop());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut values = ConfigValues::new();
        values.set("address", ParamValue::Str("127.0.0.1:7777".into()));
        values.set("database", ParamValue::Str("root.sg".into()));
        values.set("timeout", ParamValue::Duration(Duration::from_secs(15)));
        let config = IotdbConfig::from_config(&values).unwrap();
        assert_eq!(config.address, "127.0.0.1:7777");
        assert_eq!(config.database(), "root.sg");
        assert_eq!(config.timeout, Duration::from_secs(15));
    }

    #[test]
    fn debug_redacts_password() {
        let config = IotdbConfig {
            password: "hunter2".into(),
            ..IotdbConfig::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
