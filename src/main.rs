//! chat-relay - streaming HTTP relay for chat LLM providers
//!
//! Accepts `POST /api/chat` and forwards each request to the primary
//! streaming provider or, for allow-listed models, the alternate provider.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_relay::config::Config;
use chat_relay::router::{ModelRouter, Route};

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "Streaming HTTP relay for chat LLM providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file (defaults and environment only when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration and report where API keys come from
    Check {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show the model routing table
    Models {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            if let Some(path) = &config {
                tracing::info!(config = %path.display(), "Loading configuration");
            }
            let (config, key_sources) = Config::load(config.as_deref())?;
            tracing::info!(
                primary_key = %key_sources.primary,
                alternate_key = %key_sources.alternate,
                "API keys resolved"
            );

            chat_relay::relay::run_server(config, listen).await
        }

        Commands::Check { config } => {
            let (config, key_sources) = Config::load(config.as_deref())?;

            println!("Configuration OK");
            println!("  listen:        {}", config.server.listen);
            if let Some(url) = &config.server.public_url {
                println!("  public url:    {}", url);
            }
            println!("  primary url:   {}", config.primary.url);
            println!("  primary key:   {}", key_sources.primary);
            println!("  alternate url: {}", config.alternate.url);
            println!("  alternate key: {}", key_sources.alternate);
            Ok(())
        }

        Commands::Models { config } => {
            let (config, _) = Config::load(config.as_deref())?;
            let router = ModelRouter::new(&config.primary, &config.alternate);

            println!("Default model: {}", router.default_model());
            println!();
            println!("{:<28} ROUTE", "MODEL");
            for model in router
                .primary_models()
                .iter()
                .chain(router.alternate_models())
            {
                let route = router.route(model);
                let note = match route {
                    Route::Alternate if config.alternate.api_key.is_none() => " (no key)",
                    _ => "",
                };
                println!("{:<28} {}{}", model, route, note);
            }
            if router.primary_models().is_empty() {
                println!("{:<28} {}", "*", Route::Primary);
            }
            Ok(())
        }
    }
}
