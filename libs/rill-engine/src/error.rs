use rill_api::error::PluginError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("unknown output type: {0}")]
    UnknownOutput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Plugin` variant, context is added to the inner `PluginError`.
    /// For other variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Plugin(e) => EngineError::Plugin(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::UnknownOutput(msg) => EngineError::UnknownOutput(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_prepended() {
        let err = EngineError::Config("unknown parameter 'x'".into()).with_context("output 'db'");
        assert_eq!(err.to_string(), "config error: output 'db': unknown parameter 'x'");

        let err = EngineError::from(PluginError::connection("refused")).with_context("output 'db'");
        match err {
            EngineError::Plugin(e) => assert!(e.message.starts_with("output 'db'")),
            other => panic!("unexpected {other}"),
        }
    }
}
