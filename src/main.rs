use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walk_tracker::config::Config;
use walk_tracker::pipeline::{Pipeline, RecalibrateHandle};
use walk_tracker::pose::ReplaySource;
use walk_tracker::runtime::FrameLoop;
use walk_tracker::server::TelemetryServer;
use walk_tracker::telemetry::BroadcastSink;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Console input: 'r' + Enter triggers recalibration.
fn spawn_console(handle: RecalibrateHandle) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) if line.trim() == "r" => {
                    info!("recalibration triggered from console");
                    handle.trigger();
                }
                Ok(_) => {}
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, fallback) = match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path).with_context(|| format!("failed to load {}", path))?;
            (config, None)
        }
        None => Config::load_or_default(DEFAULT_CONFIG_PATH),
    };
    init_tracing(&config.log.filter);
    if let Some(e) = fallback {
        warn!(path = DEFAULT_CONFIG_PATH, error = %e, "using default config");
    }

    info!(version = env!("WALK_TRACKER_VERSION"), "walk server starting");
    info!(
        strategy = ?config.gait.strategy,
        arbiter = ?config.gait.arbiter,
        calibration_secs = config.calibration.duration_secs,
        "gameplay config"
    );

    let sink = BroadcastSink::new(config.server.channel_capacity);
    let pipeline = Pipeline::new(&config);
    let recalibrate = pipeline.recalibrate_handle();
    let source = ReplaySource::open(&config.source.replay_path, config.source.pace)
        .with_context(|| format!("failed to open {}", config.source.replay_path))?;
    let frame_loop = FrameLoop::new(pipeline, source, sink.clone(), &config.source);

    let cancel = CancellationToken::new();
    let server = TelemetryServer::bind(&config.server.listen_addr, sink, recalibrate.clone()).await?;
    let server_task = tokio::spawn(server.serve(cancel.clone()));

    spawn_console(recalibrate);
    info!("press 'r' + Enter to recalibrate, Ctrl-C to stop");
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted");
                cancel.cancel();
            }
        });
    }

    let summary = frame_loop.run(cancel.clone()).await;
    info!(
        frames = summary.frames,
        emitted = summary.emitted,
        source_errors = summary.source_errors,
        "run finished"
    );

    cancel.cancel();
    server_task.await.context("telemetry server task failed")??;
    Ok(())
}
