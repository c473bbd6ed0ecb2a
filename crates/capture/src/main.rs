use anyhow::{Context, bail};
use capture::{
    CaptureConfig, EncodedFrame, FfmpegSource, MemorySource, OpenPath, Playback, SeekableSource,
    SourceSpec,
};
use common::{TelemetryGuard, setup_logging};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const STATUS_EVERY_FRAMES: u64 = 30;
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Observer logging a status line every `STATUS_EVERY_FRAMES` frames.
fn status_reporter() -> impl Fn(&EncodedFrame) + Send + Sync + 'static {
    let frames = AtomicU64::new(0);
    let started = Instant::now();
    move |frame: &EncodedFrame| {
        let n = frames.fetch_add(1, Ordering::Relaxed) + 1;
        if n.is_multiple_of(STATUS_EVERY_FRAMES) {
            let elapsed = started.elapsed().as_secs_f64();
            tracing::info!(
                frames = n,
                fps = n as f64 / elapsed.max(f64::EPSILON),
                bytes = frame.len(),
                width = frame.width(),
                height = frame.height(),
                "Capture status"
            );
        }
    }
}

fn wait_for_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(SHUTDOWN_POLL);
    }
    tracing::info!("Shutdown requested");
}

fn write_latest(frame: Option<EncodedFrame>, path: Option<&Path>) -> anyhow::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let Some(frame) = frame else {
        tracing::warn!(path = %path.display(), "No frame decoded, nothing written");
        return Ok(());
    };
    std::fs::write(path, frame.data())
        .with_context(|| format!("Failed to write latest frame to {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = frame.len(), "Latest frame written");
    Ok(())
}

fn run_playback<S: SeekableSource + OpenPath>(
    config: &CaptureConfig,
    path: &Path,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let playback = Playback::<S>::open(path, config.encoder_config())
        .with_context(|| format!("Failed to open {}", path.display()))?;
    playback.set_looping(config.looping);
    playback.set_emulate_device(config.emulate_device);
    playback.subscribe(status_reporter());

    tracing::info!(
        path = %path.display(),
        frames = playback.frame_count(),
        looping = config.looping,
        emulate_device = config.emulate_device,
        "Playback opened"
    );

    playback.start()?;
    wait_for_shutdown(shutdown);

    let latest = playback.latest_frame();
    playback.stop(true);
    write_latest(latest, config.output_path.as_deref())
}

#[cfg(feature = "v4l2")]
fn run_device(config: &CaptureConfig, index: usize, shutdown: &AtomicBool) -> anyhow::Result<()> {
    use capture::{Device, V4lSource};

    let device = Device::<V4lSource>::open(index, config.encoder_config())
        .context("Failed to initialize camera - check V4L2 device availability")?;
    device.subscribe(status_reporter());
    device.start()?;

    if let Some(path) = &config.record_path {
        device
            .record(path)
            .with_context(|| format!("Failed to start recording to {}", path.display()))?;
    }

    wait_for_shutdown(shutdown);

    if device.is_recording() {
        device.save().context("Failed to finalize recording")?;
    }
    let latest = device.latest_frame();
    device.stop(true);
    write_latest(latest, config.output_path.as_deref())
}

#[cfg(not(feature = "v4l2"))]
fn run_device(_config: &CaptureConfig, index: usize, _shutdown: &AtomicBool) -> anyhow::Result<()> {
    bail!("Device capture (device:{index}) requires the `v4l2` feature")
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"))
}

fn run(config: &CaptureConfig, shutdown: &AtomicBool) -> anyhow::Result<()> {
    match &config.source {
        SourceSpec::File(path) if is_gif(path) => run_playback::<MemorySource>(config, path, shutdown),
        SourceSpec::File(path) => {
            if !capture::ffmpeg::ffmpeg_available() {
                bail!("ffmpeg/ffprobe not found in PATH, required to play {}", path.display());
            }
            run_playback::<FfmpegSource>(config, path, shutdown)
        }
        SourceSpec::Device(index) => run_device(config, *index, shutdown),
    }
}

fn main() -> anyhow::Result<()> {
    let config = CaptureConfig::from_env()?;

    // The OTLP exporter needs a Tokio runtime for its lifetime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("Failed to build telemetry runtime")?;
    let _runtime_guard = runtime.enter();

    let _telemetry = match &config.otel_endpoint {
        Some(endpoint) => Some(
            TelemetryGuard::init("capture", endpoint, config.environment)
                .context("Failed to initialize telemetry")?,
        ),
        None => {
            setup_logging(config.environment)?;
            None
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;

    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    match run(&config, &shutdown) {
        Ok(()) => {
            tracing::info!("Capture stopped gracefully");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Capture failed: {:#}", e);
            Err(e)
        }
    }
}
