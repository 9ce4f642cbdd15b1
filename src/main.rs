//! `lmbridge` binary: one-shot prompt or `--server`.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use thiserror::Error;
use tracing::error;
use tracing_subscriber::EnvFilter;

use lmbridge::cli::{self, Mode};
use lmbridge::provider::openai::OpenAiCompatProvider;
use lmbridge::{BridgeConfig, ProviderError, Relay, Server, ServerError, bridge};

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("cannot initialise provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("cannot write output: {0}")]
    Io(#[from] io::Error),
}

fn init_tracing(server: bool) {
    let default_level = if server { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn relay_for(config: &BridgeConfig) -> Result<Relay, ProviderError> {
    let provider =
        OpenAiCompatProvider::new(&config.base_url, &config.vendor, config.model_ids())?
            .with_token(config.token.clone());
    Ok(Relay::new(Arc::new(provider), config.selector()))
}

async fn serve(config: BridgeConfig) -> Result<(), AppError> {
    let relay = Arc::new(relay_for(&config)?);
    let router = Arc::new(bridge::router(relay, config.api_name));
    let server = Server::bind(&config.addr).await?;
    println!(
        "lmbridge running on http://{}\nPOST {} with {{\"prompt\": \"...\", \"system_prompt\": \"...\"}}",
        server.local_addr(),
        bridge::CHAT_PATH
    );

    server
        .run(move |request| {
            let router = Arc::clone(&router);
            async move { router.route(request).await }
        })
        .await?;
    Ok(())
}

async fn run(mode: Mode) -> Result<ExitCode, AppError> {
    match mode {
        Mode::Once { config, prompt } => {
            let relay = relay_for(&config)?;
            let code =
                cli::run_once(&relay, &prompt, &mut io::stdout(), &mut io::stderr()).await?;
            Ok(ExitCode::from(code))
        }
        Mode::Serve(config) => serve(config).await.map(|()| ExitCode::SUCCESS),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = std::env::args_os().map(|arg| arg.to_string_lossy().into_owned());
    let mode = match cli::parse_args(args) {
        Ok(mode) => mode,
        Err(e) => e.exit(),
    };
    init_tracing(matches!(mode, Mode::Serve(_)));

    match run(mode).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "lmbridge failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
