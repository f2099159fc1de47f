//! Argus frame capture demo: engine-delivered frames in, blocking consumer out.

use std::sync::Arc;
use std::time::Duration;

use argus::{CaptureSession, CapturedFrame, Config, FrameSink, SyntheticEngine};
use color_eyre::Result;
use flume::bounded;
use tracing::info;

/// Running engine handle; kept alive for the duration of the capture.
enum Engine {
    Synthetic(SyntheticEngine),
    #[cfg(feature = "gstreamer-engine")]
    Gst(argus::capture::gst_engine::GstEngine),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("argus=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Argus launching...");

    // Load configuration
    let config = load_config()?;
    argus::CONFIG.store(Arc::new(config.clone()));

    let session = Arc::new(CaptureSession::new());
    let engine = start_engine(&config, Arc::clone(&session))?;

    // Set up tx/rx
    let (tx, rx) = bounded::<CapturedFrame>(argus::RING_DEPTH);

    // Consumer thread: the blocking retrieval loop.
    let consumer = {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || loop {
            match session.capture_timeout(Duration::from_millis(500)) {
                Some(frame) => {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                None => {
                    if session.is_eos() {
                        info!("stream ended");
                        break;
                    }
                }
            }
        })
    };

    let mut frames = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            frame = rx.recv_async() => {
                let Ok(frame) = frame else { break };
                frames += 1;
                if frames == 1 || frames % 30 == 0 {
                    info!(
                        frames,
                        width = frame.meta.width,
                        height = frame.meta.height,
                        depth = frame.meta.depth,
                        slot = frame.meta.slot,
                        sequence = frame.meta.sequence,
                        "captured"
                    );
                }
            }
        }
    }

    // Stop consuming, then tear the engine down.
    drop(rx);
    let _ = consumer.await;
    match engine {
        Engine::Synthetic(engine) => engine.stop(),
        #[cfg(feature = "gstreamer-engine")]
        Engine::Gst(engine) => engine.close()?,
    }

    let stats = session.stats();
    info!(
        written = stats.frames_written,
        read = stats.frames_read,
        dropped = stats.frames_dropped,
        "Argus shutting down"
    );
    Ok(())
}

/// Defaults, overlaid with an optional TOML file (`ARGUS_CONFIG`) and
/// `ARGUS_*` environment variables.
fn load_config() -> Result<Config> {
    let mut builder = config::Config::builder();
    if let Ok(path) = std::env::var("ARGUS_CONFIG") {
        builder = builder.add_source(config::File::with_name(&path));
    }
    let loaded = builder
        .add_source(config::Environment::with_prefix("ARGUS").separator("__"))
        .build()?;
    Ok(loaded.try_deserialize()?)
}

fn start_engine(config: &Config, session: Arc<CaptureSession>) -> Result<Engine> {
    if config.capture.location.is_empty() && config.capture.custom_launch.is_none() {
        info!("no stream location configured; using synthetic source");
        let sink = session as Arc<dyn FrameSink>;
        return Ok(Engine::Synthetic(SyntheticEngine::start(
            sink,
            config.synthetic,
        )));
    }

    #[cfg(feature = "gstreamer-engine")]
    {
        use argus::capture::gst_engine::{build_launch_string, GstEngine};
        let launch = build_launch_string(&config.capture);
        let engine = GstEngine::new(&launch, session as Arc<dyn FrameSink>)?;
        engine.open()?;
        Ok(Engine::Gst(engine))
    }
    #[cfg(not(feature = "gstreamer-engine"))]
    {
        let _ = session;
        Err(color_eyre::eyre::eyre!(
            "stream location configured but built without the gstreamer-engine feature"
        ))
    }
}
