use clap::Parser;
use tracing_subscriber::EnvFilter;

use rf_domain::config::{Config, ConfigSeverity};
use rf_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(cli.config.as_deref())?;
            rf_gateway::bootstrap::run_server(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = Config::load(cli.config.as_deref())?;
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            println!("configuration OK");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = Config::load(cli.config.as_deref())?;
            println!("{}", render_config(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("reflector-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rf_gateway=debug")),
        )
        .json()
        .init();
}

/// Render the effective configuration with secrets masked.
fn render_config(config: &Config) -> anyhow::Result<String> {
    let mut masked = config.clone();
    if masked.storage.secret_access_key.is_some() {
        masked.storage.secret_access_key = Some("********".into());
    }
    for key in [
        &mut masked.llm.api_key,
        &mut masked.transcription.api_key,
        &mut masked.diarization.api_key,
        &mut masked.platform.api_key,
    ] {
        if key.is_some() {
            *key = Some("********".into());
        }
    }
    Ok(serde_json::to_string_pretty(&masked)?)
}
