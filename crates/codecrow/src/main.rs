use cc_core::collaborators::Collaborators;
use cc_core::config::CodeCrowConfig;
use cc_core::types::VcsProvider;
use cc_core::CodeCrowError;
use cc_db::DbProvider;
use cc_events::bus::EventBus;
use cc_events::types::EventSource;
use cc_serve::clients::{http_client, GithubClient, InferenceClient, RagServiceClient};
use cc_serve::AppState;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codecrow", about = "Code review analysis pipeline coordinator")]
struct Cli {
    /// TOML config file; a missing file means defaults
    #[arg(long, env = "CODECROW_CONFIG", default_value = "codecrow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook and API server with the housekeeping loop
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Run one housekeeping sweep and print what it removed
    Housekeep,
    /// Print the OpenAPI document
    Openapi,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "codecrow failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CodeCrowError> {
    if let Command::Openapi = cli.command {
        println!("{}", cc_serve::openapi::generate_spec());
        return Ok(());
    }

    let config = Arc::new(CodeCrowConfig::load(Some(cli.config.as_path()))?);
    let provider = open_provider(&config)?;
    match cli.command {
        Command::Migrate => {
            tracing::info!(db_path = provider.db_path(), "migrations applied");
        }
        Command::Housekeep => {
            let state = build_state(provider, Arc::clone(&config))?;
            let report = cc_serve::housekeeping::sweep(&state, EventSource::Cli).await?;
            let json = serde_json::to_string_pretty(&report).map_err(|err| {
                CodeCrowError::Internal {
                    message: err.to_string(),
                }
            })?;
            println!("{json}");
        }
        Command::Serve => {
            let state = build_state(provider, Arc::clone(&config))?;
            let sweeper = state.clone();
            tokio::spawn(async move { cc_serve::housekeeping::run(sweeper).await });
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.server.port);
            cc_serve::serve(state, addr)
                .await
                .map_err(|err| CodeCrowError::Internal {
                    message: format!("serve error: {err}"),
                })?;
        }
        Command::Openapi => {}
    }
    Ok(())
}

fn open_provider(config: &CodeCrowConfig) -> Result<Arc<DbProvider>, CodeCrowError> {
    let db_path = &config.server.db_path;
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| CodeCrowError::Internal {
            message: format!("failed to create {}: {err}", parent.display()),
        })?;
    }
    let provider = DbProvider::new(db_path.to_string_lossy(), EventBus::new(1024));
    provider.migrate()?;
    Ok(Arc::new(provider))
}

fn build_state(
    provider: Arc<DbProvider>,
    config: Arc<CodeCrowConfig>,
) -> Result<AppState, CodeCrowError> {
    let backstop = config.ai.timeout().max(config.vcs.retry().timeout()) + Duration::from_secs(30);
    let http = http_client(backstop)?;
    let github = GithubClient::new(
        http.clone(),
        config.server.github_api_url.clone(),
        config.server.github_token.clone(),
    );
    if config.server.inference_url.is_none() {
        tracing::warn!("no inference service configured; analyses will fail");
    }
    let ai = InferenceClient::new(http.clone(), config.server.inference_url.clone());
    let vectors = RagServiceClient::new(http, config.server.rag_url.clone());
    let collaborators = Collaborators::new(Arc::new(ai), Arc::new(vectors))
        .with_vcs(VcsProvider::Github, Arc::new(github));
    Ok(AppState::new(provider, collaborators, config))
}
