use clap::Parser;
use cursor_bridge::config::config_search_paths;
use cursor_bridge::{build_router, AnthropicClient, AppState, CredentialStore, Gateway, ProxyConfig, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "cursor-bridge",
    about = "Use your Claude subscription from any OpenAI-compatible editor",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request journal path (JSONL)
    #[arg(long, default_value = "cursor-bridge.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,

    /// Print the local token editors should use and exit
    #[arg(long)]
    show_token: bool,

    /// Print the last N journal entries (oldest first) and exit
    #[arg(long, value_name = "N")]
    tail_journal: Option<usize>,

    /// Print every journal entry for one request id and exit
    #[arg(long, value_name = "ID")]
    journal_request: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cursor_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    if let Some(limit) = cli.tail_journal {
        let journal = SharedLogger::new(&cli.log_file)?;
        for entry in journal.recent(limit).iter().rev() {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    if let Some(request_id) = cli.journal_request.as_deref() {
        let journal = SharedLogger::new(&cli.log_file)?;
        for entry in journal.for_request(request_id) {
            println!("{}", serde_json::to_string(&entry)?);
        }
        return Ok(());
    }

    let (config, save_path, local_token) = ProxyConfig::prepare(cli.config.as_deref(), cli.port)?;
    if cli.show_token {
        println!("{local_token}");
        return Ok(());
    }

    let logger = SharedLogger::new(&cli.log_file)?;
    let credentials = CredentialStore::load(config.credential_source());

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.upstream.timeout_secs))
        .build()?;
    let upstream = Arc::new(AnthropicClient::new(client, config.upstream.base_url.clone()));

    let gateway = Gateway::new(&config, credentials.clone(), upstream, logger.clone())?;

    info!("cursor-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:    {}", config.upstream.base_url);
    info!("  Credential:  {}", credentials.source_description());
    info!("  Default:     {}", config.default_model);
    info!("  Aliases:     {} mapped", config.models.len());
    info!("  Config:      {}", save_path.display());
    info!("  Journal:     {}", cli.log_file.display());
    if let Some(set) = credentials.current() {
        info!("  Auth mode:   {}", set.kind());
    } else {
        warn!("  Auth mode:   none (log in with `claude` or set {})", config.upstream.credential_env);
    }

    logger.info(
        "startup",
        format!(
            "Starting cursor-bridge base_url={} port={} configured={}",
            config.upstream.base_url,
            config.port,
            credentials.is_configured()
        ),
    );
    if !credentials.is_configured() {
        logger.warn("startup", "No upstream credential available");
    }

    let state = Arc::new(AppState {
        gateway,
        logger: logger.clone(),
    });

    let app = build_router(state);
    let bind_addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  In your editor's OpenAI settings:");
    info!("    Base URL:  http://localhost:{}/v1", config.port);
    info!("    API key:   {}", local_token);
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
