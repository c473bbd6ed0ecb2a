use crate::format::EncodingFormat;
use std::{io, path::PathBuf};
use thiserror::Error;

/// Errors raised by a frame source while grabbing, decoding or seeking.
///
/// Inside the worker loop these are transient: they are logged and the next
/// tick retries.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Unsupported by source: {0}")]
    Unsupported(&'static str),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("No encoder available for {0}")]
    UnsupportedFormat(EncodingFormat),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Frame buffer does not match its dimensions")]
    InvalidFrame,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Source not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to open source: {0}")]
    Open(#[source] SourceError),

    #[error("Encoding format {0} is not supported by the configured encoder")]
    UnsupportedFormat(EncodingFormat),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("A recording is already active")]
    RecordingActive,

    #[error("No active recording")]
    NoRecording,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = CaptureError::NotFound(PathBuf::from("/tmp/missing.mp4"));
        assert_eq!(err.to_string(), "Source not found: /tmp/missing.mp4");

        let err = CaptureError::InvalidArgument("frame index -1 is negative".to_string());
        assert_eq!(err.to_string(), "Invalid argument: frame index -1 is negative");

        let err = CaptureError::UnsupportedFormat(EncodingFormat::Jpeg2000);
        assert_eq!(
            err.to_string(),
            "Encoding format jp2 is not supported by the configured encoder"
        );

        let err = CaptureError::RecordingActive;
        assert_eq!(err.to_string(), "A recording is already active");

        let err = CaptureError::NoRecording;
        assert_eq!(err.to_string(), "No active recording");
    }

    #[test]
    fn test_error_conversion_from_source_error() {
        fn seek() -> Result<(), SourceError> {
            Err(SourceError::Decode("corrupt packet".to_string()))
        }

        fn uses_question_mark() -> Result<(), CaptureError> {
            seek()?;
            Ok(())
        }

        match uses_question_mark().unwrap_err() {
            CaptureError::Source(SourceError::Decode(msg)) => assert_eq!(msg, "corrupt packet"),
            other => panic!("Expected Source(Decode) variant, got {other:?}"),
        }
    }

    #[test]
    fn test_source_error_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "pipe closed");
        let err: SourceError = io_err.into();
        assert_eq!(err.to_string(), "IO error: pipe closed");
    }
}
