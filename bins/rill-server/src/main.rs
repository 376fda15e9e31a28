mod feed;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use feed::{feed, FeedEnd};
use rill_api::config::{parse_duration, ConfigParam, ParamValue};
use rill_api::registry::OutputRegistry;
use rill_config_yaml::YamlParser;
use rill_engine::config::RillConfig;
use rill_engine::Engine;

#[derive(Parser)]
#[command(name = "rill-server", about = "Feeds stdin lines to batch outputs")]
struct Cli {
    /// Path to configuration file (.yaml, .yml or .toml).
    #[arg(long, default_value = "config.yaml", env = "RILL_CONFIG")]
    config: PathBuf,

    /// How long outputs may take to drain on shutdown, e.g. "10s".
    #[arg(long, default_value = "10s", value_parser = parse_grace)]
    shutdown_grace: Duration,

    /// Print the registered output types and their parameters, then exit.
    #[arg(long)]
    list_outputs: bool,
}

fn parse_grace(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.message)
}

/// Composition root: every output type the server ships with.
fn registry() -> Result<OutputRegistry, rill_api::PluginError> {
    let registry = OutputRegistry::new();
    rill_output_iotdb::register(&registry)?;
    Ok(registry)
}

fn describe_default(param: &ConfigParam) -> String {
    match &param.default {
        _ if param.secret => "<secret>".to_string(),
        Some(ParamValue::Str(s)) => format!("{s:?}"),
        Some(ParamValue::Duration(d)) => format!("{d:?}"),
        Some(ParamValue::BatchPolicy(p)) if p.is_noop() => "none".to_string(),
        Some(other) => format!("{other:?}"),
        None if param.required => "required".to_string(),
        None => "-".to_string(),
    }
}

fn list_outputs(registry: &OutputRegistry) {
    for name in registry.names() {
        let Some(registration) = registry.get(&name) else {
            continue;
        };
        let spec = registration.spec;
        println!("{} [{}]", spec.name, spec.categories.join(", "));
        println!("  {}", spec.summary);
        for param in &spec.params {
            let mut flags = Vec::new();
            if param.optional {
                flags.push("optional");
            }
            if param.advanced {
                flags.push("advanced");
            }
            println!(
                "  {:<16} {:<13} default: {:<10} {}{}",
                param.name,
                param.param_type.to_string(),
                describe_default(param),
                param.description,
                if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                }
            );
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let registry = match registry() {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to register outputs");
            std::process::exit(1);
        }
    };

    if cli.list_outputs {
        list_outputs(&registry);
        return;
    }

    tracing::info!(config = %cli.config.display(), "loading configuration");
    let config = match RillConfig::load(&cli.config, &[&YamlParser]) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    tracing::info!(outputs = config.outputs.len(), "bootstrapping engine");
    let engine = match Engine::bootstrap(config, &registry).await {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "failed to bootstrap engine");
            std::process::exit(1);
        }
    };

    tracing::info!("rill-server started, reading messages from stdin, press Ctrl+C to stop");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    match feed(&engine, stdin, ctrl_c).await {
        FeedEnd::Eof => tracing::info!("stdin closed"),
        FeedEnd::ReadError => {}
        FeedEnd::Shutdown => tracing::info!("shutting down..."),
    }

    engine.shutdown(cli.shutdown_grace).await;
}
