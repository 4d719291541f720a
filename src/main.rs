//! file-drop server binary.
//!
//! Accepts raw file uploads from allowlisted addresses behind a per-address
//! token-bucket rate limit, stores them under the configured directory, and
//! serves stored files back over plain HTTP.

mod admission;
mod atomic;
mod background;
mod config;
mod error;
mod files;
mod http;
mod limiter;
mod logging;
mod router;
mod settings;
mod storage;
mod upload;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use crate::admission::AdmissionGate;
use crate::background::spawn_background_tasks;
use crate::config::{Args, SETTINGS_FILE_NAME};
use crate::error::ResponseMode;
use crate::limiter::{LimiterRegistry, RateConfig};
use crate::router::{AppContext, build_router};
use crate::settings::Settings;
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the file-drop server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    let home = PathBuf::from(&args.home);

    let log_file = logging::open_log_file(&home)?;
    logging::init_logging(log_file);

    let settings_path = home.join(SETTINGS_FILE_NAME);
    let settings = match Settings::load_or_init(&settings_path).await {
        Ok(settings) => Arc::new(settings),
        Err(err) => {
            error!(path = ?settings_path, error = %err, "failed to load settings");
            return Err(std::io::Error::other(err));
        }
    };
    if settings.allowlist().is_empty() {
        warn!("allowlist is empty, uploads are accepted from any address");
    }

    let storage = Arc::new(Storage::new(settings.dir().to_path_buf()));
    if let Err(err) = storage.ensure_root().await {
        error!(dir = ?storage.root_path(), error = %err, "failed to create storage directory");
        return Err(err);
    }

    let rate = RateConfig {
        rate: args.rate_limit,
        burst: args.rate_burst,
    };
    if !rate.is_enabled() {
        warn!("rate limiting disabled");
    }
    let gate = Arc::new(AdmissionGate::new(
        settings.allowlist().clone(),
        Arc::new(LimiterRegistry::new(rate)),
    ));
    let upload = Arc::new(UploadConfig {
        max_size: args.upload_max_size,
        timeout: Duration::from_secs(args.upload_timeout_secs),
    });
    let context = AppContext {
        settings: settings.clone(),
        storage: storage.clone(),
        gate: gate.clone(),
        upload,
        mode: ResponseMode::from_strict_flag(args.strict_status),
    };
    let app = build_router(context, args.cors_origins.as_deref());

    let host = args.host.parse::<IpAddr>().map_err(|err| {
        error!(host = args.host, error = %err, "invalid bind address");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string())
    })?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(
        dir = ?storage.root_path(),
        base_url = settings.base_url(),
        rate = rate.rate,
        burst = rate.burst,
        "🚀 Starting HTTP server at {}",
        addr
    );

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(
        gate.limiters().clone(),
        Duration::from_secs(args.limiter_idle_ttl_secs),
    );
    tokio::select! {
        result = server => {
            if let Err(err) = &result {
                error!(error = %err, "server stopped");
            }
            result?
        },
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
