// ABOUTME: Main entry point for the Maria assistant backend
// ABOUTME: Initializes logging and config, wires the turn loop, then serves the webhook or runs a one-off command

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use maria::{app, config::Config, metrics, webhook};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "maria", version, about = "Chat assistant backend for Slack and Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the webhook server (default)
    Serve,
    /// Print the resolved configuration with secrets redacted
    Config,
    /// Send one text message through the router and print the dispatch result
    Send {
        #[arg(long)]
        platform: String,
        #[arg(long)]
        chat_id: String,
        #[arg(long)]
        text: String,
        #[arg(long)]
        thread: Option<String>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,maria=debug,maria_core=debug,maria_agent=debug".into());
    let json = std::env::var("MARIA_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Config => {
            println!("{:#?}", config);
            Ok(())
        }
        Command::Send {
            platform,
            chat_id,
            text,
            thread,
        } => {
            let router = app::build_router(&config)?;
            let result = router
                .send_text(&platform, &chat_id, &text, thread.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!(
        model = %config.model.model,
        slack = config.slack.is_some(),
        telegram = config.telegram.is_some(),
        webhook_port = config.webhook.port,
        history = %config.history.database_path,
        "Starting Maria"
    );

    let metrics_handle = match metrics::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let app = app::build(&config)?;
    webhook::start_webhook_server(&config.webhook, app.turn_loop, metrics_handle).await
}
