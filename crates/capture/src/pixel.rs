use crate::error::SourceError;
use common::span_debug;

/// Converts a raw device buffer into packed RGB (3 bytes per pixel).
pub trait PixelDecoder: Send {
    /// Returns a view into the decoder's internal buffer, valid until the
    /// next call.
    fn decode(&mut self, raw: &[u8], width: u32, height: u32) -> Result<&[u8], SourceError>;
}

/// YUYV (YUV 4:2:2) decoder.
///
/// YUYV packs 2 pixels in 4 bytes: [Y0, U, Y1, V]
#[derive(Default)]
pub struct YuyvDecoder {
    rgb_buffer: Vec<u8>,
}

impl YuyvDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PixelDecoder for YuyvDecoder {
    fn decode(&mut self, raw: &[u8], width: u32, height: u32) -> Result<&[u8], SourceError> {
        let _s = span_debug!("yuyv_decode");

        let rgb_size = width as usize * height as usize * 3;
        let bytes_per_row = width as usize * 2;
        if width == 0 || height == 0 || raw.len() < bytes_per_row * height as usize {
            return Err(SourceError::Decode(format!(
                "YUYV buffer of {} bytes is too small for {width}x{height}",
                raw.len()
            )));
        }

        self.rgb_buffer.resize(rgb_size, 0);

        // Drivers may pad rows
        let stride = raw.len() / height as usize;

        let mut out = self.rgb_buffer.chunks_exact_mut(6);
        for row in raw.chunks(stride).take(height as usize) {
            for (chunk, px) in row[..bytes_per_row].chunks_exact(4).zip(&mut out) {
                let y0 = chunk[0] as i32;
                let u = chunk[1] as i32 - 128;
                let y1 = chunk[2] as i32;
                let v = chunk[3] as i32 - 128;

                // BT.601 fixed-point coefficients (8-bit fraction)
                let rv = (359 * v) >> 8;
                let gu = (88 * u + 183 * v) >> 8;
                let bu = (454 * u) >> 8;

                px[0] = (y0 + rv).clamp(0, 255) as u8;
                px[1] = (y0 - gu).clamp(0, 255) as u8;
                px[2] = (y0 + bu).clamp(0, 255) as u8;
                px[3] = (y1 + rv).clamp(0, 255) as u8;
                px[4] = (y1 - gu).clamp(0, 255) as u8;
                px[5] = (y1 + bu).clamp(0, 255) as u8;
            }
        }

        Ok(&self.rgb_buffer)
    }
}

/// MJPEG decoder using turbojpeg (libjpeg-turbo)
#[cfg(feature = "v4l2")]
pub struct MjpegDecoder {
    decompressor: turbojpeg::Decompressor,
    rgb_buffer: Vec<u8>,
}

#[cfg(feature = "v4l2")]
impl MjpegDecoder {
    pub fn new() -> Result<Self, SourceError> {
        let decompressor = turbojpeg::Decompressor::new()
            .map_err(|e| SourceError::Decode(format!("turbojpeg init: {e}")))?;
        Ok(Self {
            decompressor,
            rgb_buffer: Vec::new(),
        })
    }
}

#[cfg(feature = "v4l2")]
impl PixelDecoder for MjpegDecoder {
    /// Dimensions come from the JPEG header, not the negotiated format.
    fn decode(&mut self, raw: &[u8], _width: u32, _height: u32) -> Result<&[u8], SourceError> {
        let _s = span_debug!("mjpeg_decode");

        let header = self
            .decompressor
            .read_header(raw)
            .map_err(|e| SourceError::Decode(format!("MJPEG header: {e}")))?;
        let (width, height) = (header.width, header.height);
        let rgb_size = width * height * 3;

        self.rgb_buffer.resize(rgb_size, 0);

        let output = turbojpeg::Image {
            pixels: &mut self.rgb_buffer[..],
            width,
            pitch: width * 3,
            height,
            format: turbojpeg::PixelFormat::RGB,
        };

        self.decompressor
            .decompress(raw, output)
            .map_err(|e| SourceError::Decode(format!("MJPEG: {e}")))?;

        Ok(&self.rgb_buffer)
    }
}
