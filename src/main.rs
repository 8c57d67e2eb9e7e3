use anyhow::{Context, Result};
use clap::Parser;
use lingopop::audio::CpalDevices;
use lingopop::config::{Config, DEFAULT_CONFIG_PATH};
use lingopop::live::{GeminiLiveConnector, LiveSession};
use lingopop::speech::{Pronouncer, SpeechClient};
use lingopop::store::JsonFileStore;
use lingopop::{create_router, AppState};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "lingopop")]
#[command(about = "Realtime language tutor: live voice sessions, notebook and pronunciation")]
struct Args {
    /// Config file; defaults to config/lingopop.toml when present
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => Config::load(path, true)?,
        None => Config::load(DEFAULT_CONFIG_PATH, false)?,
    };

    info!("LingoPop v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let api_key = cfg.api_key()?;

    let connector = Arc::new(GeminiLiveConnector::new(
        cfg.connector_config(api_key.clone()),
    ));
    let session = LiveSession::new(Arc::new(CpalDevices::new()), connector);

    let notebook_path = cfg.notebook_path();
    let store = Arc::new(JsonFileStore::open(&notebook_path).await?);
    info!("Notebook: {}", notebook_path.display());

    let speech = Arc::new(SpeechClient::new(cfg.speech_client_config(api_key))?);
    let pronouncer = Arc::new(Pronouncer::new(speech, cfg.speech.sample_rate));

    let state = AppState::new(
        session.clone(),
        store,
        pronouncer,
        cfg.live.clone(),
        cfg.video_sampler_config(),
    );
    let app = create_router(state);

    let addr = cfg.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Release the microphone and speaker before exiting
    session.disconnect().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Ctrl-C received, shutting down");
    }
}
