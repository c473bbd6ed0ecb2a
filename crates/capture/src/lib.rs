pub mod config;
pub mod decoder;
pub mod device;
pub mod encoder;
pub mod error;
pub mod ffmpeg;
pub mod format;
pub mod frame;
pub mod memory;
pub mod pacing;
pub mod pixel;
pub mod playback;
pub mod record;
pub mod source;
pub mod state;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use config::{CaptureConfig, SourceSpec};
pub use decoder::{Decoder, DecoderCore, FrameObserver, PreTickHook};
pub use device::Device;
pub use encoder::{FrameEncoder, ImageEncoder};
pub use error::{CaptureError, EncodeError, SourceError};
pub use ffmpeg::FfmpegSource;
pub use format::{EncoderConfig, EncodingFormat, EncodingParam, EncodingParamKey};
pub use frame::{EncodedFrame, Frame};
pub use memory::MemorySource;
pub use playback::Playback;
pub use record::FfmpegRecorder;
pub use source::{
    DeviceSource, FrameRecorder, FrameSource, OpenPath, Property, RecordingSpec, SeekableSource,
};
pub use state::DecoderState;
#[cfg(feature = "v4l2")]
pub use v4l2::V4lSource;
