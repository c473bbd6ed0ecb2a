mod support;

use capture::{
    CaptureError, Decoder, DecoderCore, DecoderState, EncodeError, EncoderConfig, EncodingFormat,
    Frame, FrameEncoder,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use support::{ScriptedSource, wait_until};

/// Emits the first pixel byte, so tests can tell frames apart.
struct FirstByteEncoder;

impl FrameEncoder for FirstByteEncoder {
    fn supports(&self, format: EncodingFormat) -> bool {
        format == EncodingFormat::Bitmap
    }

    fn encode(&self, frame: &Frame, _config: &EncoderConfig) -> Result<Vec<u8>, EncodeError> {
        Ok(vec![frame.data[0]])
    }
}

fn bitmap_decoder(source: ScriptedSource) -> Decoder<ScriptedSource> {
    Decoder::with_encoder(
        source,
        EncoderConfig::new(EncodingFormat::Bitmap),
        Arc::new(FirstByteEncoder),
    )
    .unwrap()
}

#[test]
fn lifecycle_follows_state_machine() {
    let (source, _log) = ScriptedSource::new(1000);
    let decoder = bitmap_decoder(source);

    assert_eq!(decoder.state(), DecoderState::Ready);
    assert!(!decoder.pause());
    assert!(!decoder.resume());

    decoder.start().unwrap();
    assert!(decoder.is_started());
    decoder.start().unwrap();
    assert!(decoder.is_started());

    assert!(decoder.pause());
    assert!(!decoder.pause());
    assert!(decoder.is_paused());
    assert!(decoder.resume());
    assert!(decoder.is_started());

    decoder.stop(true);
    assert!(decoder.is_stopped());

    decoder.start().unwrap();
    assert!(!decoder.resume());
    assert!(decoder.is_stopped());
}

#[test]
fn stop_from_paused() {
    let (source, log) = ScriptedSource::new(1000);
    let decoder = bitmap_decoder(source);
    decoder.start().unwrap();
    decoder.pause();

    decoder.stop(true);

    assert!(decoder.is_stopped());
    assert!(log.calls().released);
}

#[test]
fn paused_decoder_grabs_nothing_but_keeps_ticking() {
    let (source, log) = ScriptedSource::new(100_000);
    let ticks = Arc::new(AtomicUsize::new(0));
    let hook_ticks = ticks.clone();
    let decoder = bitmap_decoder(source).with_pre_tick(Box::new(
        move |_core: &DecoderCore<ScriptedSource>| {
            hook_ticks.fetch_add(1, Ordering::Relaxed);
        },
    ));

    decoder.start().unwrap();
    assert!(wait_until(|| log.grab_count() >= 2));
    decoder.pause();
    // Let any in-flight tick finish
    std::thread::sleep(Duration::from_millis(10));

    let grabs = log.grab_count();
    let ticks_before = ticks.load(Ordering::Relaxed);
    assert!(wait_until(|| ticks.load(Ordering::Relaxed) >= ticks_before + 5));
    assert_eq!(log.grab_count(), grabs);
}

#[test]
fn decode_errors_are_skipped() {
    let (source, _log) = ScriptedSource::new(100);
    let decoder = bitmap_decoder(source.failing_at([1, 2]));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    decoder.subscribe(move |frame| sink.lock().unwrap().push(frame.data()[0]));

    decoder.start().unwrap();
    assert!(wait_until(|| seen.lock().unwrap().len() >= 4));
    decoder.stop(true);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(&seen[..4], &[0, 3, 4, 5]);
    assert!(decoder.is_stopped());
}

#[test]
fn latest_frames_track_last_decoded() {
    let (source, log) = ScriptedSource::new(100_000);
    let decoder = bitmap_decoder(source);
    assert!(decoder.latest_frame().is_none());
    assert!(decoder.latest_decoded().is_none());

    decoder.start().unwrap();
    assert!(wait_until(|| log.grab_count() >= 3));
    decoder.pause();
    std::thread::sleep(Duration::from_millis(10));

    let encoded = decoder.latest_frame().unwrap();
    let decoded = decoder.latest_decoded().unwrap();
    assert_eq!(encoded.data()[0], decoded.data[0]);
    assert_eq!(encoded.format(), EncodingFormat::Bitmap);
    assert_eq!(decoded.width, support::WIDTH);
}

#[test]
fn source_metadata_is_zero_after_release() {
    let (source, _log) = ScriptedSource::new(10);
    let decoder = bitmap_decoder(source.with_fps(24.0));
    assert_eq!(decoder.size(), (support::WIDTH, support::HEIGHT));
    assert_eq!(decoder.fps(), 24.0);

    decoder.stop(true);

    assert_eq!(decoder.size(), (0, 0));
    assert_eq!(decoder.width(), 0);
    assert_eq!(decoder.fps(), 0.0);
}

#[test]
fn encoder_must_support_format() {
    let (source, _log) = ScriptedSource::new(10);
    let result = Decoder::with_encoder(
        source,
        EncoderConfig::new(EncodingFormat::Png),
        Arc::new(FirstByteEncoder),
    );
    assert!(matches!(
        result,
        Err(CaptureError::UnsupportedFormat(EncodingFormat::Png))
    ));
}

#[test]
fn drop_stops_worker() {
    let (source, log) = ScriptedSource::new(100_000);
    let decoder = bitmap_decoder(source);
    decoder.start().unwrap();
    assert!(wait_until(|| log.grab_count() >= 1));

    drop(decoder);

    assert!(log.calls().released);
    let grabs = log.grab_count();
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(log.grab_count(), grabs);
}

#[test]
fn stop_without_waiting_does_not_block_on_a_stalled_grab() {
    let (source, log) = ScriptedSource::new(100);
    let decoder = bitmap_decoder(source.with_grab_delay(Duration::from_millis(1500)));
    decoder.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    decoder.stop(false);
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(200), "stop(false) took {elapsed:?}");
    assert!(decoder.is_stopped());
    assert_eq!(decoder.size(), (0, 0));
    assert_eq!(decoder.fps(), 0.0);
    assert!(!log.calls().released);

    // The worker releases the source once the stalled grab returns
    assert!(wait_until(|| log.calls().released));
}

#[test]
fn metadata_does_not_wait_for_a_running_grab() {
    let (source, _log) = ScriptedSource::new(100);
    let decoder = bitmap_decoder(
        source
            .with_fps(50.0)
            .with_grab_delay(Duration::from_millis(500)),
    );
    decoder.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    assert_eq!(decoder.size(), (support::WIDTH, support::HEIGHT));
    assert_eq!(decoder.fps(), 50.0);
    assert!(started.elapsed() < Duration::from_millis(100));
}
