//! Playback controller for file-backed sources.
//!
//! Layers seeking, looping and live-device emulation over a [`Decoder`]
//! through its pre-tick hook.

use crate::decoder::{Decoder, DecoderCore};
use crate::encoder::FrameEncoder;
use crate::error::{CaptureError, SourceError};
use crate::format::EncoderConfig;
use crate::frame::EncodedFrame;
use crate::source::{OpenPath, SeekableSource};
use crate::state::DecoderState;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::{NamedTempFile, TempPath};

/// Frames before the reported end at which playback wraps or pauses.
/// Containers often over-report their frame count by one.
pub const END_OF_STREAM_GUARD: usize = 2;

/// True when `position` is at or within [`END_OF_STREAM_GUARD`] frames of
/// the end. An unknown length (0) never ends.
pub fn at_end_of_stream(position: usize, frame_count: usize) -> bool {
    frame_count > 0 && position + END_OF_STREAM_GUARD >= frame_count
}

/// Where an emulated device would be after losing `dropped` frames.
pub fn compensated_position(
    position: usize,
    dropped: usize,
    frame_count: usize,
    looping: bool,
) -> usize {
    let target = position + dropped;
    match (frame_count, looping) {
        (0, _) => target,
        (count, true) => target % count,
        (count, false) => target.min(count),
    }
}

#[derive(Debug, Default)]
struct PlaybackState {
    looping: AtomicBool,
    emulate_device: AtomicBool,
    dropped_frames: AtomicUsize,
}

fn pause<S: SeekableSource>(core: &DecoderCore<S>, state: &PlaybackState) -> bool {
    if !core.is_started() {
        return false;
    }
    state.dropped_frames.store(0, Ordering::Relaxed);
    core.pause()
}

fn resume<S: SeekableSource>(core: &DecoderCore<S>, state: &PlaybackState) -> bool {
    if !core.is_paused() {
        return false;
    }

    if state.emulate_device.load(Ordering::Relaxed) {
        let dropped = state.dropped_frames.load(Ordering::Relaxed);
        let (position, frame_count) = core.with_source(|s| (s.position(), s.frame_count()));
        let target = compensated_position(
            position,
            dropped,
            frame_count,
            state.looping.load(Ordering::Relaxed),
        );
        if let Err(e) = seek(core, state, target) {
            tracing::warn!(target_frame = target, error = %e, "Drop compensation seek failed");
        } else if dropped > 0 {
            tracing::debug!(dropped, from = position, to = target, "Skipped frames lost while paused");
        }
    }

    let resumed = core.resume();
    state.dropped_frames.store(0, Ordering::Relaxed);
    resumed
}

fn seek<S: SeekableSource>(
    core: &DecoderCore<S>,
    state: &PlaybackState,
    frame: usize,
) -> Result<(), SourceError> {
    if core.with_source(|s| s.position()) == frame {
        return Ok(());
    }

    let was_paused = core.is_paused();
    pause(core, state);

    let result = core.with_source(|s| s.seek(frame));

    if !was_paused {
        resume(core, state);
    }
    result
}

fn pre_tick<S: SeekableSource>(core: &DecoderCore<S>, state: &PlaybackState) {
    if core.is_paused() {
        state.dropped_frames.fetch_add(1, Ordering::Relaxed);
        return;
    }
    if !core.is_started() {
        return;
    }

    let (position, frame_count) = core.with_source(|s| (s.position(), s.frame_count()));
    if !at_end_of_stream(position, frame_count) {
        return;
    }

    if state.looping.load(Ordering::Relaxed) {
        tracing::debug!(position, frame_count, "End of stream, looping");
        if let Err(e) = seek(core, state, 0) {
            tracing::warn!(error = %e, "Failed to rewind for loop");
        }
        resume(core, state);
    } else {
        tracing::debug!(position, frame_count, "End of stream, pausing");
        pause(core, state);
    }
}

/// A decoder over a seekable source with loop and device-emulation support.
pub struct Playback<S: SeekableSource> {
    decoder: Decoder<S>,
    state: Arc<PlaybackState>,
    path: Option<PathBuf>,
    temp: Option<TempPath>,
}

impl<S: SeekableSource> Playback<S> {
    pub fn new(source: S, config: EncoderConfig) -> Result<Self, CaptureError> {
        Ok(Self::from_decoder(Decoder::new(source, config)?, None, None))
    }

    pub fn with_encoder(
        source: S,
        config: EncoderConfig,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Result<Self, CaptureError> {
        Ok(Self::from_decoder(
            Decoder::with_encoder(source, config, encoder)?,
            None,
            None,
        ))
    }

    fn from_decoder(decoder: Decoder<S>, path: Option<PathBuf>, temp: Option<TempPath>) -> Self {
        let state = Arc::new(PlaybackState::default());
        let hook_state = state.clone();
        let span = tracing::info_span!(
            "playback",
            format = %decoder.config().format(),
            path = ?path,
        );
        let decoder = decoder
            .with_span(span)
            .with_pre_tick(Box::new(move |core: &DecoderCore<S>| pre_tick(core, &hook_state)));

        Self {
            decoder,
            state,
            path,
            temp,
        }
    }

    pub fn start(&self) -> Result<(), CaptureError> {
        self.decoder.start()
    }

    /// Pause playback and reset the dropped-frame counter.
    pub fn pause(&self) -> bool {
        pause(self.decoder.core(), &self.state)
    }

    /// Resume playback. With device emulation the position first jumps
    /// past the frames a live device would have produced while paused.
    pub fn resume(&self) -> bool {
        resume(self.decoder.core(), &self.state)
    }

    pub fn stop(&self, wait_for_worker: bool) {
        self.decoder.stop(wait_for_worker);
    }

    /// Move playback to `frame`. Negative indices are rejected.
    pub fn seek(&self, frame: i64) -> Result<(), CaptureError> {
        let index = usize::try_from(frame).map_err(|_| {
            CaptureError::InvalidArgument(format!("frame index {frame} is negative"))
        })?;
        seek(self.decoder.core(), &self.state, index)?;
        Ok(())
    }

    pub fn looping(&self) -> bool {
        self.state.looping.load(Ordering::Relaxed)
    }

    pub fn set_looping(&self, looping: bool) {
        self.state.looping.store(looping, Ordering::Relaxed);
    }

    pub fn emulate_device(&self) -> bool {
        self.state.emulate_device.load(Ordering::Relaxed)
    }

    pub fn set_emulate_device(&self, emulate: bool) {
        self.state.emulate_device.store(emulate, Ordering::Relaxed);
    }

    /// Index of the next frame to be decoded; 0 once released.
    pub fn position(&self) -> usize {
        let core = self.decoder.core();
        if core.is_released() {
            return 0;
        }
        core.with_source(|s| s.position())
    }

    /// 0 once released or when the container does not report a length.
    pub fn frame_count(&self) -> usize {
        let core = self.decoder.core();
        if core.is_released() {
            return 0;
        }
        core.with_source(|s| s.frame_count())
    }

    /// Ticks elapsed in the current pause.
    pub fn dropped_frames(&self) -> usize {
        self.state.dropped_frames.load(Ordering::Relaxed)
    }

    /// File the source was opened from, including the temporary copy made
    /// by [`Playback::from_reader`].
    pub fn source_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> DecoderState {
        self.decoder.state()
    }

    pub fn is_ready(&self) -> bool {
        self.decoder.is_ready()
    }

    pub fn is_started(&self) -> bool {
        self.decoder.is_started()
    }

    pub fn is_paused(&self) -> bool {
        self.decoder.is_paused()
    }

    pub fn is_stopped(&self) -> bool {
        self.decoder.is_stopped()
    }

    pub fn size(&self) -> (u32, u32) {
        self.decoder.size()
    }

    pub fn fps(&self) -> f64 {
        self.decoder.fps()
    }

    pub fn latest_frame(&self) -> Option<EncodedFrame> {
        self.decoder.latest_frame()
    }

    pub fn subscribe(&self, observer: impl Fn(&EncodedFrame) + Send + Sync + 'static) {
        self.decoder.subscribe(observer);
    }
}

impl<S: SeekableSource + OpenPath> Playback<S> {
    /// Open a file. A missing file fails before any decoding resources exist.
    pub fn open(path: impl AsRef<Path>, config: EncoderConfig) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CaptureError::NotFound(path.to_path_buf()));
        }

        let source = S::open_path(path).map_err(CaptureError::Open)?;
        let decoder = Decoder::new(source, config)?;
        Ok(Self::from_decoder(decoder, Some(path.to_path_buf()), None))
    }

    /// Copy `reader` into a temporary file and play it. The copy is deleted
    /// once the source has been released.
    pub fn from_reader(mut reader: impl Read, config: EncoderConfig) -> Result<Self, CaptureError> {
        let mut file = NamedTempFile::new()?;
        io::copy(&mut reader, &mut file)?;
        file.flush()?;

        let temp = file.into_temp_path();
        let source = S::open_path(&temp).map_err(CaptureError::Open)?;
        let decoder = Decoder::new(source, config)?;
        let path = temp.to_path_buf();
        Ok(Self::from_decoder(decoder, Some(path), Some(temp)))
    }
}

impl<S: SeekableSource> Drop for Playback<S> {
    fn drop(&mut self) {
        self.decoder.stop(true);

        if let Some(temp) = self.temp.take() {
            if let Err(e) = temp.close() {
                tracing::warn!(error = %e, "Failed to delete temporary source copy");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== End of Stream ==========

    #[test]
    fn end_of_stream_guard_is_two_frames() {
        assert!(!at_end_of_stream(7, 10));
        assert!(at_end_of_stream(8, 10));
        assert!(at_end_of_stream(9, 10));
        assert!(at_end_of_stream(10, 10));
    }

    #[test]
    fn unknown_length_never_ends() {
        assert!(!at_end_of_stream(0, 0));
        assert!(!at_end_of_stream(1_000, 0));
    }

    #[test]
    fn tiny_clips_are_always_at_end() {
        assert!(at_end_of_stream(0, 1));
        assert!(at_end_of_stream(0, 2));
        assert!(!at_end_of_stream(0, 3));
    }

    // ========== Drop Compensation ==========

    #[test]
    fn compensation_without_loop_clamps_to_frame_count() {
        assert_eq!(compensated_position(3, 4, 100, false), 7);
        assert_eq!(compensated_position(95, 20, 100, false), 100);
        assert_eq!(compensated_position(3, 0, 100, false), 3);
    }

    #[test]
    fn compensation_with_loop_wraps() {
        assert_eq!(compensated_position(95, 20, 100, true), 15);
        assert_eq!(compensated_position(3, 4, 100, true), 7);
        assert_eq!(compensated_position(0, 300, 100, true), 0);
    }

    #[test]
    fn compensation_with_unknown_length_moves_forward() {
        assert_eq!(compensated_position(10, 5, 0, true), 15);
        assert_eq!(compensated_position(10, 5, 0, false), 15);
    }

    #[test]
    fn compensation_advance_matches_min_of_dropped_and_remaining() {
        let frame_count = 50;
        for position in 0..frame_count {
            for dropped in 0..80 {
                let advanced = compensated_position(position, dropped, frame_count, false) - position;
                assert_eq!(advanced, dropped.min(frame_count - position));
            }
        }
    }
}
