//! Facelens - Tracked-Entity Overlay Pipeline
//!
//! Main entry point for the CLI application.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use facelens::{
    capture::CapturePipeline,
    config::Config,
    coordinator::{self, Coordinator, LifecycleEvent},
    inference::{CommandDetector, DisabledDetector, InferenceService},
    overlay::{AssetLoader, FileAssetDecoder},
    render::{OverlayStyle, OverlaySurface},
    session::UdpSessionProvider,
    web::WebServer,
    AppState,
};

/// Facelens - face overlays and on-demand object detection
#[derive(Parser, Debug)]
#[command(name = "facelens", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Disable HTTP server
    #[arg(long)]
    no_http: bool,

    /// HTTP server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Detector program (enables inference, overrides config)
    #[arg(long)]
    detector: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", facelens::NAME, facelens::VERSION);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args))?;

    info!("Facelens stopped");
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;

    info!(
        "Face packets: {}:{}",
        config.session.listen_address, config.session.port
    );
    info!("Inference: {}", config.inference.enabled);
    info!("HTTP server: {}", config.http.enabled);

    let overlay = OverlaySurface::new(OverlayStyle::from(&config.renderer));

    let detector: Arc<dyn InferenceService> = if config.inference.enabled {
        info!(
            "Detector: {} {}",
            config.inference.command,
            config.inference.args.join(" ")
        );
        Arc::new(CommandDetector::new(&config.inference))
    } else {
        info!("Inference disabled, capture requests will only log");
        Arc::new(DisabledDetector)
    };
    let capture = CapturePipeline::new(detector, overlay.clone(), &config.inference);

    let (loader, completions) =
        AssetLoader::new(&config.assets, Arc::new(FileAssetDecoder));
    let provider = Box::new(UdpSessionProvider::new(&config.session));
    let pipeline = Coordinator::new(provider, loader, completions, capture, &config.pipeline);

    let (handle, inbox) = coordinator::channel(32);
    let state = AppState::new(config.clone(), handle.clone(), overlay);

    let coordinator_task = tokio::spawn(pipeline.run(inbox, state.subscribe_shutdown()));

    // Start HTTP server if enabled
    let http_task = if config.http.enabled {
        let server = WebServer::new(Arc::clone(&state), &config.http);
        Some(tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    match handle.lifecycle(LifecycleEvent::Resume).await? {
        Ok(lifecycle) => info!("Pipeline {}", lifecycle),
        Err(e) => error!("{}", e),
    }

    // Wait for Ctrl+C / SIGTERM
    shutdown_signal().await;
    info!("Shutdown signal received");

    if let Err(e) = handle.lifecycle(LifecycleEvent::Destroy).await {
        warn!("Destroy not delivered: {}", e);
    }
    state.shutdown();

    coordinator_task.await?;
    if let Some(task) = http_task {
        if tokio::time::timeout(Duration::from_secs(3), task).await.is_err() {
            warn!("HTTP server did not stop in time");
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if let Some(ref path) = args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    // Apply CLI overrides
    if args.no_http {
        config.http.enabled = false;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }
    if let Some(ref detector) = args.detector {
        config.inference.enabled = true;
        config.inference.command = detector.clone();
        config.inference.args.clear();
    }

    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
