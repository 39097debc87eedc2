use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deepthink::api::ApiServer;
use deepthink::config::{Config, ObservabilityConfig};
use deepthink::mcp::{McpHandler, ToolRegistry};
use deepthink::reasoner::{ChatCompletionsReasoner, Reasoner};

#[derive(Parser, Debug)]
#[command(name = "deepthink-server")]
#[command(about = "MCP server exposing a DeepSeek R1 thinking tool over SSE")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "deepthink.toml")]
    config: PathBuf,

    /// Host to bind to (overrides config and HOST)
    #[arg(long)]
    host: Option<String>,

    /// Base port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log output format: "pretty" or "json"
    #[arg(long)]
    log_format: Option<String>,
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::new(&observability.log_level);
    let registry = tracing_subscriber::registry().with(filter);

    if observability.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // A missing .env file is fine; real environment variables still apply.
    dotenvy::dotenv().ok();

    let mut config = Config::load_or_default(&args.config)
        .with_context(|| format!("Failed to load config file {}", args.config.display()))?;
    config.apply_env()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(format) = args.log_format {
        config.observability.log_format = format;
    }

    init_tracing(&config.observability);

    let settings = config.validate()?;
    tracing::info!("Using model {} at {}", settings.model, settings.api_url);

    let reasoner: Arc<dyn Reasoner> = Arc::new(ChatCompletionsReasoner::from_settings(&settings)?);
    let registry = Arc::new(ToolRegistry::with_builtin_tools(reasoner)?);
    let handler = Arc::new(McpHandler::new(registry));
    let server = ApiServer::with_config(handler, &config.server);

    let requested = config.server.port;
    let port = deepthink::port::find_available_port(
        &config.server.host,
        requested,
        config.server.port_search_limit,
    )
    .await?;
    if port != requested {
        tracing::warn!("Port {} was not available, using port {} instead", requested, port);
    }

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, port))?;

    server.serve(listener).await?;

    Ok(())
}
