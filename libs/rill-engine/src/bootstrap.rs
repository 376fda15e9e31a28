use std::time::Duration;

use rill_api::message::Message;
use rill_api::registry::OutputRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RillConfig;
use crate::error::EngineError;
use crate::plugin_host;
use crate::runner::OutputRunner;

/// Per-output sender + join handle.
struct OutputSlot {
    name: String,
    tx: mpsc::Sender<Message>,
    handle: tokio::task::JoinHandle<()>,
}

/// The running engine — one runner task per configured output.
pub struct Engine {
    outputs: Vec<OutputSlot>,
    token: CancellationToken,
    config: RillConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("outputs", &self.output_names())
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    /// Bootstrap the engine from a parsed configuration.
    ///
    /// Every output is built before any runner is spawned, so a config
    /// error leaves nothing running.
    pub async fn bootstrap(config: RillConfig, registry: &OutputRegistry) -> Result<Self, EngineError> {
        config.validate()?;

        let mut built = Vec::with_capacity(config.outputs.len());
        for output_cfg in &config.outputs {
            built.push(plugin_host::build_output(registry, output_cfg)?);
        }

        if config.outputs.is_empty() {
            tracing::warn!("no outputs configured, messages will be dropped");
        }

        let token = CancellationToken::new();
        let mut outputs = Vec::with_capacity(built.len());
        for (output_cfg, built) in config.outputs.iter().zip(built) {
            let (tx, rx) = mpsc::channel(output_cfg.buffer);
            tracing::info!(
                output = %output_cfg.name,
                kind = %output_cfg.kind,
                max_in_flight = built.max_in_flight,
                batching = ?built.batch_policy,
                "starting output"
            );
            let runner = OutputRunner::new(output_cfg.name.clone(), built, rx, token.child_token());
            outputs.push(OutputSlot {
                name: output_cfg.name.clone(),
                tx,
                handle: tokio::spawn(runner.run()),
            });
        }

        Ok(Engine {
            outputs,
            token,
            config,
        })
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|s| s.name.as_str()).collect()
    }

    /// Send a message to every output. Waits while an output's buffer is
    /// full.
    pub async fn dispatch(&self, msg: Message) {
        for slot in &self.outputs {
            if slot.tx.send(msg.clone()).await.is_err() {
                tracing::warn!(output = %slot.name, "output stopped, message dropped");
            }
        }
    }

    /// Graceful shutdown: stop accepting messages, let outputs drain and
    /// close. Runners still busy after `grace` are cancelled.
    pub async fn shutdown(self, grace: Duration) {
        let Engine { outputs, token, .. } = self;

        let mut handles = Vec::with_capacity(outputs.len());
        for slot in outputs {
            drop(slot.tx);
            handles.push((slot.name, slot.handle));
        }

        let drained = tokio::time::timeout(grace, async {
            for (name, handle) in handles.iter_mut() {
                if let Err(e) = handle.await {
                    tracing::error!(output = %name, error = %e, "output task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(?grace, "outputs did not drain in time, cancelling");
            token.cancel();
            for (name, handle) in handles {
                if handle.is_finished() {
                    continue;
                }
                if let Err(e) = handle.await {
                    tracing::error!(output = %name, error = %e, "output task failed");
                }
            }
        }

        tracing::info!("engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_api::batch::BatchPolicy;
    use rill_api::config::{ConfigParam, ConfigValues, ParamType};
    use rill_api::error::{PluginError, WriteError};
    use rill_api::message::MessageBatch;
    use rill_api::output::{BatchOutput, Resources};
    use rill_api::registry::{BuiltOutput, OutputSpec};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    /// Collects written payloads; optionally never connects.
    struct Collector {
        written: Arc<Mutex<Vec<String>>>,
        connects: bool,
    }

    impl BatchOutput for Collector {
        fn connect<'a>(
            &'a self,
            _token: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
            Box::pin(async move {
                if self.connects {
                    Ok(())
                } else {
                    Err(PluginError::connection("unreachable"))
                }
            })
        }

        fn write_batch<'a>(
            &'a self,
            batch: &'a MessageBatch,
            _token: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<(), WriteError>> + Send + 'a>> {
            Box::pin(async move {
                let mut written = self.written.lock().unwrap();
                for msg in batch {
                    written.push(String::from_utf8_lossy(&msg.as_bytes()?).into_owned());
                }
                Ok(())
            })
        }

        fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn registry(written: Arc<Mutex<Vec<String>>>) -> OutputRegistry {
        let registry = OutputRegistry::new();
        let spec = OutputSpec::new("collect").params([
            ConfigParam::new("connects", ParamType::Bool)
                .default_value(rill_api::config::ParamValue::Bool(true)),
            ConfigParam::max_in_flight(),
            ConfigParam::batch_policy("batching"),
        ]);
        registry
            .register_batch_output(spec, move |values: &ConfigValues, _: &Resources| {
                Ok(BuiltOutput {
                    output: Arc::new(Collector {
                        written: written.clone(),
                        connects: values.get_bool("connects").unwrap_or(true),
                    }),
                    batch_policy: values
                        .get_batch_policy("batching")
                        .cloned()
                        .unwrap_or_else(BatchPolicy::default),
                    max_in_flight: values.max_in_flight()?,
                })
            })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn dispatches_to_every_output_and_drains_on_shutdown() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let config = RillConfig::parse(
            r#"
            [[outputs]]
            name = "first"
            type = "collect"

            [[outputs]]
            name = "second"
            type = "collect"
            config = { batching = { count = 10 } }
            "#,
        )
        .unwrap();

        let engine = Engine::bootstrap(config, &registry(written.clone())).await.unwrap();
        assert_eq!(engine.output_names(), vec!["first", "second"]);

        engine.dispatch(Message::new("one")).await;
        engine.dispatch(Message::new("two")).await;
        engine.shutdown(Duration::from_secs(5)).await;

        let mut written = written.lock().unwrap().clone();
        written.sort();
        assert_eq!(written, vec!["one", "one", "two", "two"]);
    }

    #[tokio::test]
    async fn unknown_output_type_fails_bootstrap() {
        let config = RillConfig::parse(
            r#"
            [[outputs]]
            name = "db"
            type = "nosuch"
            "#,
        )
        .unwrap();
        let err = Engine::bootstrap(config, &registry(Arc::default())).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownOutput(_)), "{err}");
    }

    #[tokio::test]
    async fn invalid_output_config_fails_bootstrap() {
        let config = RillConfig::parse(
            r#"
            [[outputs]]
            name = "db"
            type = "collect"
            config = { max_in_flight = 0 }
            "#,
        )
        .unwrap();
        let err = Engine::bootstrap(config, &registry(Arc::default())).await.unwrap_err();
        assert!(err.to_string().contains("max_in_flight"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_outputs_that_never_connect() {
        let config = RillConfig::parse(
            r#"
            [[outputs]]
            name = "down"
            type = "collect"
            config = { connects = false }
            "#,
        )
        .unwrap();
        let written = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::bootstrap(config, &registry(written.clone())).await.unwrap();
        engine.dispatch(Message::new("lost")).await;
        engine.shutdown(Duration::from_secs(2)).await;
        assert!(written.lock().unwrap().is_empty());
    }
}
