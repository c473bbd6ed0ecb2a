use crate::error::EncodeError;
use crate::format::{EncoderConfig, EncodingFormat, EncodingParamKey};
use crate::frame::Frame;
use common::span;
use image::{
    ExtendedColorType, ImageEncoder as _,
    codecs::{
        bmp::BmpEncoder,
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
        pnm::{PnmEncoder, PnmSubtype, SampleEncoding},
        tiff::TiffEncoder,
        webp::WebPEncoder,
    },
};
use std::io::Cursor;

const DEFAULT_JPEG_QUALITY: u8 = 95;
const DEFAULT_PBM_THRESHOLD: u8 = 128;

/// Turns a decoded frame into the compressed bytes handed to consumers.
pub trait FrameEncoder: Send + Sync {
    fn supports(&self, format: EncodingFormat) -> bool;

    fn encode(&self, frame: &Frame, config: &EncoderConfig) -> Result<Vec<u8>, EncodeError>;
}

/// Default encoder backed by the `image` crate.
///
/// JPEG 2000 and Sun raster have no encoder there and are rejected when the
/// decoder is constructed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageEncoder;

impl FrameEncoder for ImageEncoder {
    fn supports(&self, format: EncodingFormat) -> bool {
        !matches!(format, EncodingFormat::Jpeg2000 | EncodingFormat::Raster)
    }

    fn encode(&self, frame: &Frame, config: &EncoderConfig) -> Result<Vec<u8>, EncodeError> {
        let _s = span!("encode");

        if !frame.is_well_formed() {
            return Err(EncodeError::InvalidFrame);
        }

        let (w, h) = (frame.width, frame.height);
        let mut out = Vec::with_capacity(frame.data.len() / 4);

        match config.format() {
            EncodingFormat::Png => {
                let compression = match config.param(EncodingParamKey::PngCompression) {
                    Some(level) if level <= 2 => CompressionType::Fast,
                    Some(level) if level >= 7 => CompressionType::Best,
                    _ => CompressionType::Default,
                };
                PngEncoder::new_with_quality(&mut out, compression, FilterType::Adaptive)
                    .write_image(&frame.data, w, h, ExtendedColorType::Rgb8)?;
            }
            EncodingFormat::Jpeg => {
                let quality = config
                    .param(EncodingParamKey::JpegQuality)
                    .map_or(DEFAULT_JPEG_QUALITY, |q| q.clamp(1, 100) as u8);
                JpegEncoder::new_with_quality(&mut out, quality).write_image(
                    &frame.data,
                    w,
                    h,
                    ExtendedColorType::Rgb8,
                )?;
            }
            EncodingFormat::Tiff => {
                let mut cursor = Cursor::new(&mut out);
                TiffEncoder::new(&mut cursor).write_image(
                    &frame.data,
                    w,
                    h,
                    ExtendedColorType::Rgb8,
                )?;
            }
            EncodingFormat::WebP => {
                WebPEncoder::new_lossless(&mut out).write_image(
                    &frame.data,
                    w,
                    h,
                    ExtendedColorType::Rgb8,
                )?;
            }
            EncodingFormat::Bitmap => {
                BmpEncoder::new(&mut out).write_image(
                    &frame.data,
                    w,
                    h,
                    ExtendedColorType::Rgb8,
                )?;
            }
            EncodingFormat::Pbm => {
                let threshold = config
                    .param(EncodingParamKey::PbmThreshold)
                    .map_or(DEFAULT_PBM_THRESHOLD, |t| t.clamp(0, 255) as u8);
                let bits = threshold_luma(&frame.data, threshold);
                PnmEncoder::new(&mut out)
                    .with_subtype(PnmSubtype::Bitmap(SampleEncoding::Binary))
                    .write_image(&bits, w, h, ExtendedColorType::L8)?;
            }
            format @ (EncodingFormat::Jpeg2000 | EncodingFormat::Raster) => {
                return Err(EncodeError::UnsupportedFormat(format));
            }
        }

        Ok(out)
    }
}

/// PBM samples: 1 is black, 0 is white.
fn threshold_luma(rgb: &[u8], threshold: u8) -> Vec<u8> {
    rgb.chunks_exact(Frame::CHANNELS)
        .map(|px| {
            // BT.601 luma, 8-bit fixed point
            let luma = (77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8;
            u8::from(luma < threshold as u32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity(Frame::expected_len(width, height));
        for y in 0..height {
            for x in 0..width {
                data.push(((x * 255) / width) as u8);
                data.push(((y * 255) / height) as u8);
                data.push((((x + y) * 127) / (width + height)) as u8);
            }
        }
        Frame::new(data, width, height)
    }

    #[test]
    fn png_output_has_png_signature() {
        let bytes = ImageEncoder
            .encode(&gradient(16, 8), &EncoderConfig::new(EncodingFormat::Png))
            .unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn jpeg_quality_changes_output_size() {
        let frame = gradient(64, 64);
        let low = ImageEncoder
            .encode(
                &frame,
                &EncoderConfig::new(EncodingFormat::Jpeg).with_param(EncodingParamKey::JpegQuality, 10),
            )
            .unwrap();
        let high = ImageEncoder
            .encode(
                &frame,
                &EncoderConfig::new(EncodingFormat::Jpeg).with_param(EncodingParamKey::JpegQuality, 100),
            )
            .unwrap();

        assert_eq!(&low[..2], &[0xFF, 0xD8], "JPEG SOI marker");
        assert!(low.len() < high.len());
    }

    #[test]
    fn bitmap_output_has_bm_header() {
        let bytes = ImageEncoder
            .encode(&gradient(4, 4), &EncoderConfig::new(EncodingFormat::Bitmap))
            .unwrap();
        assert_eq!(&bytes[..2], b"BM");
    }

    #[test]
    fn unsupported_formats_are_rejected() {
        for format in [EncodingFormat::Jpeg2000, EncodingFormat::Raster] {
            assert!(!ImageEncoder.supports(format));
            let err = ImageEncoder
                .encode(&gradient(4, 4), &EncoderConfig::new(format))
                .unwrap_err();
            assert!(matches!(err, EncodeError::UnsupportedFormat(f) if f == format));
        }
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let frame = Frame::new(vec![0; 10], 4, 4);
        let err = ImageEncoder
            .encode(&frame, &EncoderConfig::default())
            .unwrap_err();
        assert!(matches!(err, EncodeError::InvalidFrame));
    }

    #[test]
    fn threshold_luma_maps_dark_pixels_to_one() {
        let bits = threshold_luma(&[0, 0, 0, 255, 255, 255], 128);
        assert_eq!(bits, vec![1, 0]);
    }
}
