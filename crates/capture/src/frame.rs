use crate::format::EncodingFormat;
use std::sync::Arc;

/// A decoded image: packed RGB, 3 bytes per pixel, rows top to bottom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }

    /// Bytes a frame of these dimensions must hold.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::CHANNELS
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == Self::expected_len(self.width, self.height)
    }
}

/// The most recently encoded image.
///
/// Cloning is cheap; the pixel bytes are shared. A snapshot may already be
/// superseded by the time a consumer reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    format: EncodingFormat,
}

impl EncodedFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: EncodingFormat) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> EncodingFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_detection() {
        assert!(Frame::empty().is_empty());
        assert!(Frame::new(vec![0; 12], 0, 4).is_empty());
        assert!(!Frame::new(vec![0; 12], 2, 2).is_empty());
    }

    #[test]
    fn well_formed_requires_exact_length() {
        assert!(Frame::new(vec![0; 2 * 2 * 3], 2, 2).is_well_formed());
        assert!(!Frame::new(vec![0; 11], 2, 2).is_well_formed());
    }

    #[test]
    fn encoded_frame_clones_share_bytes() {
        let frame = EncodedFrame::new(vec![1, 2, 3], 1, 1, EncodingFormat::Png);
        let copy = frame.clone();
        assert_eq!(copy.data().as_ptr(), frame.data().as_ptr());
        assert_eq!(copy.len(), 3);
        assert_eq!(copy.format(), EncodingFormat::Png);
    }
}
