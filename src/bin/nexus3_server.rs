//! NEXUS3 server binary.
//!
//! Thin CLI over the runtime core: config-directory init commands and the
//! `--serve` mode exposing the JSON-RPC control plane plus the SSE event
//! plane.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use nexus3::nexus3::clients::openai::OpenAIClient;
use nexus3::nexus3::config::{discover_api_key, init_global, init_local, load_config};
use nexus3::nexus3::registry::{AgentRegistry, ClientFactory};
use nexus3::nexus3::rpc::{serve, AuthConfig, ServerState, DEFAULT_PORT};
use nexus3::EventHub;

#[derive(Parser)]
#[command(name = "nexus3-server", about = "NEXUS3 agent runtime server")]
struct Cli {
    /// Run the server, optionally on a specific port.
    #[arg(long, value_name = "PORT", num_args = 0..=1, default_missing_value = "8765")]
    serve: Option<u16>,

    /// Bearer credential required by the control plane.
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,

    /// Working directory used for configuration discovery.
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Initialize the global ~/.nexus3/ directory and exit.
    #[arg(long)]
    init_global: bool,

    /// Like --init-global, overwriting existing files.
    #[arg(long)]
    init_global_force: bool,

    /// Initialize ./.nexus3/ for the current project and exit.
    #[arg(long)]
    init_local: bool,

    /// Default model for new agents.
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.init_global || cli.init_global_force {
        println!("{}", init_global(cli.init_global_force)?);
        return Ok(());
    }

    let cwd = match cli.cwd.clone() {
        Some(cwd) => cwd,
        None => std::env::current_dir()?,
    };

    if cli.init_local {
        println!("{}", init_local(&cwd, false)?);
        return Ok(());
    }

    let config = load_config(&cwd)?;

    let provider = config.provider.clone();
    let default_model = cli
        .model
        .clone()
        .or_else(|| provider.model.clone())
        .unwrap_or_else(|| "gpt-4o".to_string());
    let provider_key = provider.resolve_api_key().unwrap_or_default();
    if provider_key.is_empty() {
        warn!("no provider API key configured; LLM calls will fail");
    }
    let base_url = provider
        .base_url
        .clone()
        .unwrap_or_else(|| nexus3::nexus3::clients::openai::DEFAULT_BASE_URL.to_string());

    let client_factory: ClientFactory = Arc::new(move |model_override: Option<&str>| {
        let model = model_override.map(str::to_string).unwrap_or_else(|| default_model.clone());
        Arc::new(OpenAIClient::with_base_url(
            base_url.clone(),
            provider_key.clone(),
            model,
        )) as Arc<dyn nexus3::ClientWrapper>
    });

    let hub = Arc::new(EventHub::default());
    let registry = Arc::new(
        AgentRegistry::new(Arc::clone(&hub), client_factory).with_gitlab(config.gitlab.clone()),
    );

    let auth = match discover_api_key(cli.api_key.as_deref(), &config) {
        Some(key) => AuthConfig::bearer(key),
        None => {
            warn!("no API key configured; control plane is unauthenticated");
            AuthConfig::None
        }
    };

    let port = cli.serve.unwrap_or(DEFAULT_PORT);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let port = listener.local_addr()?.port();
    let state = Arc::new(ServerState::new(registry, auth, port));

    info!("NEXUS3 server starting on port {}", port);
    serve(state, listener).await?;
    Ok(())
}
