use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::EngineError;

/// Root configuration: the outputs messages are fanned out to.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RillConfig {
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

/// One output instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Instance name, unique within the config. Used in logs.
    pub name: String,

    /// Registered output type, e.g. `"iotdb"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Messages queued for this output before `dispatch` waits.
    #[serde(default = "default_buffer")]
    pub buffer: usize,

    /// Output-specific parameters, validated against the type's params.
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

fn default_buffer() -> usize {
    1024
}

/// A config file format.
///
/// The engine knows TOML; other formats live in their own crates and are
/// handed to [`RillConfig::load`] by the binary.
pub trait ConfigParser: Send + Sync {
    /// File extensions this parser handles, without the dot.
    fn extensions(&self) -> &[&str];

    fn parse(&self, content: &str) -> Result<RillConfig, EngineError>;
}

pub struct TomlParser;

impl ConfigParser for TomlParser {
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn parse(&self, content: &str) -> Result<RillConfig, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

impl RillConfig {
    /// Load configuration from a file, picking the parser by extension.
    ///
    /// `TomlParser` is always available; `parsers` adds more formats.
    pub fn load(path: &Path, parsers: &[&dyn ConfigParser]) -> Result<Self, EngineError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                EngineError::Config(format!("{}: missing file extension", path.display()))
            })?;

        let toml = TomlParser;
        let parser = std::iter::once(&toml as &dyn ConfigParser)
            .chain(parsers.iter().copied())
            .find(|p| p.extensions().contains(&ext))
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "{}: unsupported config format '.{ext}'",
                    path.display()
                ))
            })?;

        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        let config = parser
            .parse(&content)
            .map_err(|e| e.with_context(path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config = TomlParser.parse(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not need the output registry.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for output in &self.outputs {
            if output.name.is_empty() {
                return Err(EngineError::Config("output name must not be empty".into()));
            }
            if !seen.insert(output.name.as_str()) {
                return Err(EngineError::Config(format!(
                    "duplicate output name '{}'",
                    output.name
                )));
            }
            if output.buffer == 0 {
                return Err(EngineError::Config(format!(
                    "output '{}': buffer must be at least 1",
                    output.name
                )));
            }
        }
        Ok(())
    }
}
