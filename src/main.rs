//! folio-chat - chat proxy for the portfolio site
//!
//! Fronts the Google generative-language API for the site's chat widget:
//! - Request validation and sanitization
//! - Ordered model fallback chain
//! - Follow-up suggestion derivation
//! - Conditional CORS grants

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use folio_chat::config::Config;
use folio_chat::proxy::{self, AppState, GeminiClient};

#[derive(Parser)]
#[command(name = "folio-chat")]
#[command(about = "Chat proxy for the portfolio site")]
struct Args {
    /// HTTP server port (default: 8787)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY")]
    gemini_api_key: Option<String>,

    /// Comma-separated origins allowed to receive CORS grants
    #[arg(long, env = "FOLIO_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from ~/.folio-chat/.env or current dir)
    let env_path = dirs::home_dir()
        .map(|h| h.join(".folio-chat").join(".env"))
        .filter(|p| p.exists());
    if let Some(path) = env_path {
        let _ = dotenvy::from_path(&path);
    } else {
        let _ = dotenvy::dotenv(); // fallback to current dir
    }

    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Load config file (~/.folio-chat/config.toml)
    let config = Config::load();

    // Resolve values: CLI args > env vars (handled by clap) > config file
    let api_key = args.gemini_api_key.or(config.gemini_api_key);

    let allowed_origins = if args.allowed_origins.is_empty() {
        config.allowed_origins.unwrap_or_default()
    } else {
        args.allowed_origins
    };

    let port = args.port.or(config.port).unwrap_or(8787);

    let backend = match api_key {
        Some(key) if !key.is_empty() => {
            Some(Arc::new(GeminiClient::new(key)) as Arc<dyn proxy::GenerativeBackend>)
        }
        _ => {
            warn!("GEMINI_API_KEY is not set; chat requests will answer 503");
            None
        }
    };

    let mut state = AppState::new(backend).with_allowed_origins(allowed_origins);
    if let Some(models) = config.models {
        state = state.with_models(models);
    }

    info!("model chain: {}", state.models.join(" -> "));
    proxy::run(&args.host, port, state).await
}
