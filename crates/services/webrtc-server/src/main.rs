//! Proctoring stream server entry point
//!
//! Runs the publish-session lifecycle, the WHIP/WHEP proxy to MediaMTX and
//! the HTTP API consumed by the exam frontend.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: HTTP on 0.0.0.0:4001, MediaMTX at http://127.0.0.1:8889
//! cargo run -p proctor-server
//!
//! # Point at a remote MediaMTX and enable AI analysis hand-off
//! cargo run -p proctor-server -- \
//!   --mediamtx-host http://192.168.0.95:8889 \
//!   --ai-service-url http://127.0.0.1:5678 \
//!   --analysis-autostart true
//!
//! # Load a TOML file; flags and env vars override it
//! cargo run -p proctor-server -- --config ./proctor.toml
//! ```

use anyhow::Context;
use clap::Parser;
use proctor_http::HttpServer;
use proctor_webrtc::{
    AnalysisNotifier, HeartbeatSweeper, HttpAnalysisNotifier, MediaMtxClient, NoopNotifier,
    ProctorConfig, StreamLifecycleController,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Proctoring Stream Server
///
/// Brokers WebRTC publish sessions between exam browsers and MediaMTX.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "PROCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long, env = "PROCTOR_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Public URL browsers use to reach this service
    #[arg(long, env = "BACKEND_PUBLIC_URL")]
    public_url: Option<String>,

    /// MediaMTX WHIP/WHEP base URL
    #[arg(long, env = "MEDIAMTX_HOST")]
    mediamtx_host: Option<String>,

    /// MediaMTX RTSP base URL (derived from the MediaMTX host when omitted)
    #[arg(long, env = "MEDIAMTX_RTSP_URL")]
    rtsp_base_url: Option<String>,

    /// AI analysis service base URL
    #[arg(long, env = "AI_SERVICE_URL")]
    ai_service_url: Option<String>,

    /// Ask the AI service to consume streams as soon as they go live
    #[arg(long, env = "AI_ANALYSIS_AUTOSTART")]
    analysis_autostart: Option<bool>,

    /// Seconds without a heartbeat before a stream is stopped
    #[arg(long, env = "PROCTOR_HEARTBEAT_TIMEOUT_SECS")]
    heartbeat_timeout_secs: Option<u64>,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, env = "PROCTOR_MAX_SESSIONS")]
    max_sessions: Option<usize>,
}

impl Args {
    /// Load the config file (if any) and apply flag/env overrides
    fn into_config(self) -> anyhow::Result<ProctorConfig> {
        let mut config = match &self.config {
            Some(path) => ProctorConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ProctorConfig::default(),
        };

        if let Some(bind_address) = self.bind_address {
            config.http.bind_address = bind_address;
        }
        if let Some(public_url) = self.public_url {
            config.http.public_url = public_url;
        }
        if let Some(host) = self.mediamtx_host {
            if self.rtsp_base_url.is_none() {
                config.media_server.rtsp_base_url = derive_rtsp_base_url(&host);
            }
            config.media_server.base_url = host;
        }
        if let Some(rtsp_base_url) = self.rtsp_base_url {
            config.media_server.rtsp_base_url = rtsp_base_url;
        }
        if let Some(ai_service_url) = self.ai_service_url {
            config.analysis.base_url = Some(ai_service_url);
        }
        if let Some(autostart) = self.analysis_autostart {
            config.analysis.autostart = autostart;
        }
        if let Some(timeout) = self.heartbeat_timeout_secs {
            config.lifecycle.heartbeat_timeout_secs = timeout;
        }
        if let Some(max_sessions) = self.max_sessions {
            config.lifecycle.max_sessions = max_sessions;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// MediaMTX serves RTSP on 8554 next to WHIP/WHEP on 8889
fn derive_rtsp_base_url(mediamtx_host: &str) -> String {
    let host = mediamtx_host.trim_end_matches('/');
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    format!("rtsp://{}", host.replace(":8889", ":8554"))
}

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up Ctrl+C handler at the very start
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, initiating shutdown...");

        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        // Give it a moment for graceful shutdown
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(10));
            eprintln!("Graceful shutdown timeout (10s), forcing exit");
            std::process::exit(0);
        });
    })
    .context("Failed to set Ctrl+C handler")?;

    // Create multi-threaded tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("proctor-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    // Initialize tracing (logging)
    init_tracing();

    let config = args.into_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.http.bind_address,
        media_server = %config.media_server.base_url,
        rtsp_base_url = %config.media_server.rtsp_base_url,
        analysis_service = config.analysis.base_url.as_deref().unwrap_or("disabled"),
        "Proctor stream server starting"
    );

    let media_server = Arc::new(MediaMtxClient::new(&config.media_server)?);
    let notifier: Arc<dyn AnalysisNotifier> =
        match HttpAnalysisNotifier::from_config(&config.analysis)? {
            Some(notifier) => Arc::new(notifier),
            None => {
                if config.analysis.autostart {
                    warn!("Analysis autostart is enabled but no AI service URL is configured");
                }
                Arc::new(NoopNotifier)
            }
        };

    let controller = Arc::new(StreamLifecycleController::new(
        &config,
        media_server,
        notifier,
    )?);
    let sweeper =
        HeartbeatSweeper::spawn(Arc::clone(&controller), config.lifecycle.sweep_interval());

    let server = HttpServer::new(&config.http.bind_address, Arc::clone(&controller))?;

    let shutdown_future = async move {
        while !shutdown_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        info!("Shutdown signal received, stopping HTTP server...");
    };

    let served = server.serve_with_shutdown(shutdown_future).await;

    sweeper.shutdown().await;
    stop_all(&controller).await;
    controller.drain().await;

    served?;
    info!("Proctor stream server shut down gracefully");
    Ok(())
}

/// Stop every remaining session so MediaMTX drops its resources
async fn stop_all(controller: &StreamLifecycleController) {
    let sessions = controller.sessions();
    if sessions.is_empty() {
        return;
    }

    info!("Stopping {} remaining sessions", sessions.len());
    for session in sessions {
        if let Err(e) = controller.stop(&session.session_id).await {
            warn!("Failed to stop session {}: {}", session.session_id, e);
        }
    }
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,webrtc=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
