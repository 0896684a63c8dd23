//! Process bootstrap: parse configuration, run recovery, start the
//! scanner and worker background tasks, then serve the HTTP surface.
//! Mirrors the teacher's `main.rs` sequence (tracing init, config load,
//! background tasks started before the listener binds, `create_app`),
//! per §9's "start the Scanner and Worker during explicit startup,
//! before the HTTP listener is bound."

mod encoder;
mod error;
mod probe;
mod routes;
mod state;
mod worker;

use clap::Parser;
use encoder::ProcessEncoder;
use probe::FfprobeProbe;
use spacesaver_config::{Args, Config};
use spacesaver_core::scanner::fs::RealFs;
use spacesaver_core::{Catalog, MediaProbe, Recovery, SalvageConfig, Scanner, ScannerConfig};
use state::AppState;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "ts", "m4v", "webm"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spacesaver_server=info,spacesaver_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::load(args)?;
    info!(workdir = %config.workdir.display(), roots = config.media_roots.len(), "configuration loaded");

    tokio::fs::create_dir_all(&config.workdir).await?;
    for root in &config.media_roots {
        if !tokio::fs::try_exists(&root.path).await.unwrap_or(false) {
            anyhow::bail!("media root {:?} does not exist or is not accessible", root.path);
        }
    }

    let db_path = config.workdir.join("catalog.sqlite");
    let catalog = Catalog::open(&db_path).await?;

    let fs = Arc::new(RealFs::new());
    let probe: Arc<dyn MediaProbe> = Arc::new(FfprobeProbe::new("ffprobe"));
    let salvage = SalvageConfig {
        target_codec: config.target_codec,
        duration_tolerance_s: config.salvage_duration_tolerance_s,
    };

    let recovery = Recovery::new(fs.clone(), probe.clone(), catalog.clone(), salvage);
    match recovery.run_once().await {
        Ok(report) => info!(?report, "recovery pass complete"),
        Err(err) => {
            error!(error = %err, "recovery pass failed, continuing with an inconsistent catalog would be unsafe");
            return Err(err.into());
        }
    }

    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    let scanner_config = ScannerConfig {
        roots: config
            .media_roots
            .iter()
            .map(|r| spacesaver_core::MediaRoot {
                path: r.path.clone(),
                category: r.category,
            })
            .collect(),
        extensions: MEDIA_EXTENSIONS.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
    };
    let classify_cfg = spacesaver_core::ClassifyConfig {
        target_codec: config.target_codec,
        tv_bitrate_floor_bps: config.bitrate_floor_tv,
        movie_bitrate_floor_bps: config.bitrate_floor_movie,
    };
    let scanner = Scanner::new(fs.clone(), probe.clone(), catalog.clone(), scanner_config, classify_cfg);

    let scanner_cancel = cancel.clone();
    let rescan_interval = config.rescan_interval;
    let scanner_task = tokio::spawn(async move {
        loop {
            if let Err(err) = scanner.scan_once().await {
                error!(error = %err, "scan pass failed");
            }
            tokio::select! {
                _ = scanner_cancel.cancelled() => return,
                _ = tokio::time::sleep(rescan_interval) => {}
            }
        }
    });

    let progress = Arc::new(worker::progress::ProgressCell::new());
    let encoder = Arc::new(ProcessEncoder::new("ffmpeg", config.encoder_grace_period));
    let worker = worker::Worker::new(
        catalog.clone(),
        fs.clone(),
        probe.clone(),
        encoder,
        config.clone(),
        progress.clone(),
    );
    let worker_cancel = cancel.clone();
    let worker_task = tokio::spawn(async move { worker.run(worker_cancel).await });

    let state = AppState {
        catalog: catalog.clone(),
        config: config.clone(),
        progress,
    };
    let app = routes::create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if let Err(err) = scanner_task.await {
        warn!(error = %err, "scanner task did not shut down cleanly");
    }
    if let Err(err) = worker_task.await {
        warn!(error = %err, "worker task did not shut down cleanly");
    }

    info!("shutdown complete");
    Ok(())
}

/// Waits for `SIGTERM` or `SIGINT`, then signals cooperative shutdown to
/// the scanner and worker tasks (§5 "Cancellation").
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    cancel.cancel();
}
