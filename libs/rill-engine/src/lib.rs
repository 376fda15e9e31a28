pub mod bootstrap;
pub mod config;
pub mod error;
pub mod plugin_host;
pub mod runner;

pub use bootstrap::Engine;
pub use config::{ConfigParser, OutputConfig, RillConfig, TomlParser};
pub use error::EngineError;
