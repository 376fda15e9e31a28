use rill_engine::config::{ConfigParser, RillConfig};
use rill_engine::error::EngineError;

pub struct YamlParser;

impl ConfigParser for YamlParser {
    fn extensions(&self) -> &[&str] {
        &["yaml", "yml"]
    }

    fn parse(&self, content: &str) -> Result<RillConfig, EngineError> {
        serde_yaml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}
