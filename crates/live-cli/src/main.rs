use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use live_core::config::{Config, LoggingConfig, ServerConfig};
use live_gateway::GatewayState;

mod demo;
mod logging;

const DEFAULT_CONFIG: &str = "live.json5";

#[derive(Parser)]
#[command(
    name = "live",
    about = "Server-driven live UI over WebSockets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway with the demo elements
    Serve {
        /// Port to listen on (default: 9292)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,

        /// Keep-alive interval in milliseconds
        #[arg(long)]
        keep_alive_ms: Option<u64>,

        /// Do not serve the embedded client and demo page
        #[arg(long)]
        no_assets: bool,
    },

    /// Query a running gateway's health endpoint
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = Config::load(&config_path)?;

    logging::init(&config.logging(), cli.verbose)?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            keep_alive_ms,
            no_assets,
        } => {
            let server = config.server.get_or_insert_with(ServerConfig::default);
            if let Some(port) = port {
                server.port = port;
            }
            if let Some(bind) = bind {
                server.bind = bind;
            }
            if let Some(ms) = keep_alive_ms {
                server.keep_alive_ms = ms;
            }
            if no_assets {
                server.assets = false;
            }

            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            if !errors.is_empty() {
                anyhow::bail!("Invalid configuration: {}", errors.join("; "));
            }

            let resolver = demo::resolver();
            tracing::info!(classes = ?resolver.classes(), "Starting live gateway");

            #[cfg(feature = "metrics")]
            live_gateway::metrics::install_prometheus_recorder()?;

            let state = Arc::new(GatewayState::new(Arc::new(config), resolver.freeze()));
            live_gateway::start_gateway(state).await?;
        }
        Commands::Status => {
            let url = format!("http://{}:{}/health", config.bind(), config.port());
            println!("Live v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            match reqwest::get(&url).await {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(e) => {
                    tracing::debug!(%e, "Health request failed");
                    println!("Status: not running ({url})");
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let effective = Config {
                    server: Some(config.server()),
                    logging: Some(config.logging()),
                };
                println!("{}", serde_json::to_string_pretty(&effective)?);
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK");
            }
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        config_path.display()
                    );
                }
                let defaults = Config {
                    server: Some(ServerConfig::default()),
                    logging: Some(LoggingConfig::default()),
                };
                defaults.save(&config_path)?;
                println!("Wrote {}", config_path.display());
            }
        },
    }

    Ok(())
}
