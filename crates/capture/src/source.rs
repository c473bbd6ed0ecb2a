//! Capabilities the engine consumes from a capture or decoding backend.
//!
//! Sources are driven from the decoder's worker thread behind a mutex, so
//! they only need to be `Send`.

use crate::error::SourceError;
use crate::frame::Frame;
use crate::record::FfmpegRecorder;
use std::path::Path;

pub trait FrameSource: Send + 'static {
    /// Advance to the next frame. `Ok(false)` means no frame is available
    /// (end of stream, unplugged device) and is not an error.
    fn grab(&mut self) -> Result<bool, SourceError>;

    /// Decode the frame selected by the last successful `grab`. May be empty.
    fn retrieve(&mut self) -> Result<Frame, SourceError>;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn fps(&self) -> f64;

    /// Ask the backend to report failures as errors instead of silently
    /// returning empty frames. Called once when decoding starts.
    fn set_fail_fast(&mut self, _enabled: bool) {}

    /// Release the underlying device or file. Must be idempotent.
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// A source with a finite, addressable timeline (files, clips).
pub trait SeekableSource: FrameSource {
    /// Index of the frame the next `grab` will return.
    fn position(&self) -> usize;

    /// Total number of frames, 0 when unknown.
    fn frame_count(&self) -> usize;

    fn seek(&mut self, index: usize) -> Result<(), SourceError>;
}

/// Sources that can be opened from a file on disk.
pub trait OpenPath: Sized {
    fn open_path(path: &Path) -> Result<Self, SourceError>;
}

/// Device controls exposed by physical cameras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Saturation,
    Contrast,
    Exposure,
    Gain,
    Hue,
    Focus,
    AutoExposure,
    AutoFocus,
}

/// Geometry and rate a recording is opened with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingSpec {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Sink receiving decoded frames while a recording is active.
pub trait FrameRecorder: Send {
    fn write(&mut self, frame: &Frame) -> Result<(), SourceError>;

    /// Flush and close the output.
    fn finish(self: Box<Self>) -> Result<(), SourceError>;
}

/// A live capture device.
pub trait DeviceSource: FrameSource {
    fn property(&self, property: Property) -> Result<f64, SourceError>;

    fn set_property(&mut self, property: Property, value: f64) -> Result<(), SourceError>;

    fn open_recorder(
        &self,
        path: &Path,
        spec: RecordingSpec,
    ) -> Result<Box<dyn FrameRecorder>, SourceError> {
        Ok(Box::new(FfmpegRecorder::create(path, spec)?))
    }
}
