use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rill_api::batch::BatchPolicy;
use rill_api::config::{parse_duration, ConfigParam, ConfigValues, ParamType, ParamValue};
use rill_api::output::Resources;
use rill_api::registry::{BuiltOutput, OutputRegistry};

use crate::config::OutputConfig;
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Config parsing & validation (format-independent)
// ---------------------------------------------------------------------------

/// Parse plugin config into format-independent key-value pairs.
///
/// `config` is a format-independent `serde_json::Value` (already deserialized
/// from TOML or YAML by the config loader).
///
/// - Rejects unknown keys (not declared in `params`).
/// - Converts `serde_json::Value` → `ParamValue` based on declared `ParamType`.
/// - `null` counts as absent.
///
/// Returns only the keys that are present in the config source.
/// Defaults and required-checks are handled by `validate_and_build`.
pub fn parse_plugin_config(
    config: Option<&serde_json::Value>,
    params: &[ConfigParam],
) -> Result<HashMap<String, ParamValue>, EngineError> {
    let obj = match config {
        Some(serde_json::Value::Object(map)) => map,
        Some(serde_json::Value::Null) | None => return Ok(HashMap::new()),
        Some(_) => {
            return Err(EngineError::Config(
                "plugin config must be a table/object".into(),
            ))
        }
    };

    // Reject unknown keys — any key not declared by the output.
    let known: HashSet<&str> = params.iter().map(|p| p.name.as_str()).collect();
    for key in obj.keys() {
        if !known.contains(key.as_str()) {
            return Err(EngineError::Config(format!(
                "unknown parameter '{key}'"
            )));
        }
    }

    let mut result = HashMap::new();
    for param in params {
        match obj.get(&param.name) {
            Some(serde_json::Value::Null) | None => {}
            Some(v) => {
                let pv = value_to_param_value(v, param)?;
                result.insert(param.name.clone(), pv);
            }
        }
    }

    Ok(result)
}

/// Build `ConfigValues` from parsed key-value pairs (format-independent).
///
/// For each declared param:
/// - If present in `parsed`: use the value.
/// - If absent with default: use default value.
/// - If absent and required: return error.
/// - If absent and optional: leave absent.
pub fn validate_and_build(
    parsed: &HashMap<String, ParamValue>,
    params: &[ConfigParam],
) -> Result<ConfigValues, EngineError> {
    let mut values = ConfigValues::new();

    for param in params {
        match parsed.get(&param.name) {
            Some(v) => {
                values.set(&param.name, v.clone());
            }
            None => {
                if let Some(ref default) = param.default {
                    values.set(&param.name, default.clone());
                } else if param.required {
                    return Err(EngineError::Config(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
            }
        }
    }

    Ok(values)
}

/// `parse_plugin_config` followed by `validate_and_build`.
pub fn resolve_config(
    params: &[ConfigParam],
    config: Option<&serde_json::Value>,
) -> Result<ConfigValues, EngineError> {
    let raw = parse_plugin_config(config, params)?;
    validate_and_build(&raw, params)
}

/// Resolved values for logging: secrets are masked.
pub fn describe_values(params: &[ConfigParam], values: &ConfigValues) -> String {
    params
        .iter()
        .filter_map(|p| {
            let value = values.get(&p.name)?;
            let shown = if p.secret {
                "<redacted>".to_string()
            } else {
                format!("{value:?}")
            };
            Some(format!("{}={shown}", p.name))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Look up the output type, validate its config and call its factory.
pub fn build_output(
    registry: &OutputRegistry,
    cfg: &OutputConfig,
) -> Result<BuiltOutput, EngineError> {
    let ctx = format!("output '{}'", cfg.name);
    let registration = registry
        .get(&cfg.kind)
        .ok_or_else(|| EngineError::UnknownOutput(cfg.kind.clone()).with_context(&ctx))?;

    let params = &registration.spec.params;
    let values = resolve_config(params, cfg.config.as_ref()).map_err(|e| e.with_context(&ctx))?;
    tracing::debug!(
        output = %cfg.name,
        kind = %cfg.kind,
        config = %describe_values(params, &values),
        "resolved output config"
    );

    let resources = Resources::new(&cfg.name);
    let built = (registration.factory)(&values, &resources)
        .map_err(|e| EngineError::from(e).with_context(&ctx))?;
    if built.max_in_flight == 0 {
        return Err(EngineError::Config(format!(
            "{ctx}: max_in_flight must be at least 1"
        )));
    }
    Ok(built)
}

/// Convert a single value to a ParamValue according to the declared type.
fn value_to_param_value(
    val: &serde_json::Value,
    param: &ConfigParam,
) -> Result<ParamValue, EngineError> {
    match param.param_type {
        ParamType::Bool => {
            let b = val.as_bool().ok_or_else(|| {
                EngineError::Config(format!("parameter '{}': expected bool", param.name))
            })?;
            Ok(ParamValue::Bool(b))
        }
        ParamType::I64 => {
            let i = val.as_i64().ok_or_else(|| {
                EngineError::Config(format!("parameter '{}': expected integer", param.name))
            })?;
            Ok(ParamValue::I64(i))
        }
        ParamType::U64 => Ok(ParamValue::U64(value_to_u64(val, &param.name)?)),
        ParamType::F64 => {
            let f = val.as_f64().ok_or_else(|| {
                EngineError::Config(format!("parameter '{}': expected float", param.name))
            })?;
            Ok(ParamValue::F64(f))
        }
        ParamType::Str => Ok(ParamValue::Str(value_to_string(val, &param.name)?)),
        ParamType::Duration => Ok(ParamValue::Duration(value_to_duration(val, &param.name)?)),
        ParamType::BatchPolicy => Ok(ParamValue::BatchPolicy(value_to_batch_policy(
            val,
            &param.name,
        )?)),
    }
}

fn value_to_u64(val: &serde_json::Value, name: &str) -> Result<u64, EngineError> {
    // Try u64 first (covers positive integers from any source).
    if let Some(u) = val.as_u64() {
        return Ok(u);
    }
    // Fall back to i64 for formats that only have signed integers.
    let i = val.as_i64().ok_or_else(|| {
        EngineError::Config(format!("parameter '{name}': expected integer"))
    })?;
    Err(EngineError::Config(format!(
        "parameter '{name}': expected non-negative integer, got {i}"
    )))
}

/// Duration string (`"10s"`, `"1m30s"`) or integer milliseconds.
fn value_to_duration(val: &serde_json::Value, name: &str) -> Result<Duration, EngineError> {
    match val {
        serde_json::Value::String(s) => parse_duration(s)
            .map_err(|e| EngineError::Config(format!("parameter '{name}': {}", e.message))),
        serde_json::Value::Number(_) => {
            let ms = value_to_u64(val, name)?;
            Ok(Duration::from_millis(ms))
        }
        _ => Err(EngineError::Config(format!(
            "parameter '{name}': expected duration string or milliseconds"
        ))),
    }
}

/// Object `{ count, byte_size, period }`, every key optional.
fn value_to_batch_policy(val: &serde_json::Value, name: &str) -> Result<BatchPolicy, EngineError> {
    let obj = val.as_object().ok_or_else(|| {
        EngineError::Config(format!("parameter '{name}': expected a table/object"))
    })?;

    let mut policy = BatchPolicy::default();
    for (key, v) in obj {
        let field = format!("{name}.{key}");
        match key.as_str() {
            "count" => policy.count = value_to_u64(v, &field)? as usize,
            "byte_size" => policy.byte_size = value_to_u64(v, &field)? as usize,
            "period" => {
                let period = value_to_duration(v, &field)?;
                policy.period = (!period.is_zero()).then_some(period);
            }
            other => {
                return Err(EngineError::Config(format!(
                    "parameter '{name}': unknown key '{other}'"
                )));
            }
        }
    }
    Ok(policy)
}

/// Strings as-is. Number and bool scalars are accepted in their text
/// form, since YAML and TOML users often leave them unquoted.
fn value_to_string(val: &serde_json::Value, name: &str) -> Result<String, EngineError> {
    match val {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            Err(EngineError::Config(format!(
                "parameter '{name}': expected string"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Vec<ConfigParam> {
        let mut name = ConfigParam::new("name", ParamType::Str);
        name.required = true;

        let mut token = ConfigParam::new("token", ParamType::Str);
        token.secret = true;
        token.default = Some(ParamValue::Str("changeme".into()));

        let mut database = ConfigParam::new("database", ParamType::Str);
        database.optional = true;

        vec![
            name,
            token,
            database,
            ConfigParam::new("timeout", ParamType::Duration)
                .default_value(ParamValue::Duration(Duration::from_secs(10))),
            ConfigParam::new("retries", ParamType::I64).default_value(ParamValue::I64(3)),
            ConfigParam::max_in_flight(),
            ConfigParam::batch_policy("batching"),
        ]
    }

    #[test]
    fn defaults_fill_absent_params_but_not_optional_ones() {
        let values = resolve_config(&params(), Some(&json!({ "name": "x" }))).unwrap();
        assert_eq!(values.get_str("name"), Some("x"));
        assert_eq!(values.get_str("token"), Some("changeme"));
        assert!(!values.contains("database"));
        assert_eq!(values.get_duration("timeout"), Some(Duration::from_secs(10)));
        assert_eq!(values.get_u64("max_in_flight"), Some(64));
        assert_eq!(values.get_batch_policy("batching"), Some(&BatchPolicy::default()));
    }

    #[test]
    fn missing_required_param_fails() {
        let err = resolve_config(&params(), None).unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'name'"));
    }

    #[test]
    fn null_counts_as_absent() {
        let values =
            resolve_config(&params(), Some(&json!({ "name": "x", "database": null }))).unwrap();
        assert!(!values.contains("database"));
    }

    #[test]
    fn durations_from_strings_and_millis() {
        let values =
            resolve_config(&params(), Some(&json!({ "name": "x", "timeout": "1m30s" }))).unwrap();
        assert_eq!(values.get_duration("timeout"), Some(Duration::from_secs(90)));

        let values =
            resolve_config(&params(), Some(&json!({ "name": "x", "timeout": 250 }))).unwrap();
        assert_eq!(values.get_duration("timeout"), Some(Duration::from_millis(250)));

        let err = resolve_config(&params(), Some(&json!({ "name": "x", "timeout": true })))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn batch_policy_object() {
        let values = resolve_config(
            &params(),
            Some(&json!({
                "name": "x",
                "batching": { "count": 10, "byte_size": 4096, "period": "500ms" }
            })),
        )
        .unwrap();
        assert_eq!(
            values.get_batch_policy("batching"),
            Some(&BatchPolicy {
                count: 10,
                byte_size: 4096,
                period: Some(Duration::from_millis(500)),
            })
        );

        let err = resolve_config(
            &params(),
            Some(&json!({ "name": "x", "batching": { "size": 10 } })),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown key 'size'"));
    }

    #[test]
    fn type_mismatches_and_unknown_keys() {
        let err = resolve_config(&params(), Some(&json!({ "name": "x", "retries": "three" })))
            .unwrap_err();
        assert!(err.to_string().contains("expected integer"));

        let err = resolve_config(&params(), Some(&json!({ "name": "x", "max_in_flight": -1 })))
            .unwrap_err();
        assert!(err.to_string().contains("non-negative"));

        let err = resolve_config(&params(), Some(&json!({ "name": "x", "nme": "y" })))
            .unwrap_err();
        assert!(err.to_string().contains("unknown parameter 'nme'"));

        let err = resolve_config(&params(), Some(&json!(["name"]))).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn string_params_reject_arrays_and_objects() {
        let err = resolve_config(&params(), Some(&json!({ "name": ["db", 6667] }))).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)), "{err}");
        assert!(err.to_string().contains("parameter 'name': expected string"), "{err}");

        let err = resolve_config(&params(), Some(&json!({ "name": "x", "token": { "k": 1 } })))
            .unwrap_err();
        assert!(err.to_string().contains("parameter 'token': expected string"), "{err}");

        let values =
            resolve_config(&params(), Some(&json!({ "name": 6667, "database": true }))).unwrap();
        assert_eq!(values.get_str("name"), Some("6667"));
        assert_eq!(values.get_str("database"), Some("true"));
    }

    #[test]
    fn describe_masks_secrets() {
        let values = resolve_config(
            &params(),
            Some(&json!({ "name": "x", "token": "very-secret" })),
        )
        .unwrap();
        let described = describe_values(&params(), &values);
        assert!(described.contains("token=<redacted>"));
        assert!(!described.contains("very-secret"));
        assert!(described.contains("name=Str(\"x\")"));
    }

    #[test]
    fn unknown_output_type() {
        let registry = OutputRegistry::new();
        let cfg = OutputConfig {
            name: "sink".into(),
            kind: "nosuch".into(),
            buffer: 1,
            config: None,
        };
        match build_output(&registry, &cfg) {
            Err(EngineError::UnknownOutput(msg)) => assert!(msg.contains("nosuch")),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("expected unknown output"),
        }
    }
}
