//! V4L2 capture devices (Linux), behind the `v4l2` feature.

use crate::device::{AUTO_EXPOSURE_OFF, AUTO_EXPOSURE_ON, Device};
use crate::error::{CaptureError, SourceError};
use crate::format::EncoderConfig;
use crate::frame::Frame;
use crate::pixel::{MjpegDecoder, PixelDecoder, YuyvDecoder};
use crate::source::{DeviceSource, FrameSource, Property};
use common::retry::retry_with_backoff;
use v4l::{
    Device as V4lDevice, FourCC,
    buffer::Type,
    control::{Control, Value},
    io::{mmap::Stream, traits::CaptureStream},
    video::Capture,
};

const BUFFER_COUNT: u32 = 4;

const FOURCC_YUYV: FourCC = FourCC { repr: *b"YUYV" };
const FOURCC_MJPG: FourCC = FourCC { repr: *b"MJPG" };

// V4L2 control IDs (from videodev2.h)
const V4L2_CID_CONTRAST: u32 = 0x0098_0901;
const V4L2_CID_SATURATION: u32 = 0x0098_0902;
const V4L2_CID_HUE: u32 = 0x0098_0903;
const V4L2_CID_GAIN: u32 = 0x0098_0913;
const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const V4L2_CID_FOCUS_ABSOLUTE: u32 = 0x009a_090a;
const V4L2_CID_FOCUS_AUTO: u32 = 0x009a_090c;

// V4L2_CID_EXPOSURE_AUTO menu entries
const V4L2_EXPOSURE_MANUAL: i64 = 1;
const V4L2_EXPOSURE_APERTURE_PRIORITY: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    Yuyv,
    Mjpeg,
}

fn control_id(property: Property) -> u32 {
    match property {
        Property::Saturation => V4L2_CID_SATURATION,
        Property::Contrast => V4L2_CID_CONTRAST,
        Property::Exposure => V4L2_CID_EXPOSURE_ABSOLUTE,
        Property::Gain => V4L2_CID_GAIN,
        Property::Hue => V4L2_CID_HUE,
        Property::Focus => V4L2_CID_FOCUS_ABSOLUTE,
        Property::AutoExposure => V4L2_CID_EXPOSURE_AUTO,
        Property::AutoFocus => V4L2_CID_FOCUS_AUTO,
    }
}

fn to_control_value(property: Property, value: f64) -> Value {
    match property {
        Property::AutoFocus => Value::Boolean(value != 0.0),
        Property::AutoExposure if value == AUTO_EXPOSURE_OFF => {
            Value::Integer(V4L2_EXPOSURE_MANUAL)
        }
        Property::AutoExposure => Value::Integer(V4L2_EXPOSURE_APERTURE_PRIORITY),
        _ => Value::Integer(value.round() as i64),
    }
}

fn from_control_value(property: Property, value: &Value) -> Result<f64, SourceError> {
    match (property, value) {
        (Property::AutoExposure, Value::Integer(V4L2_EXPOSURE_MANUAL)) => Ok(AUTO_EXPOSURE_OFF),
        (Property::AutoExposure, Value::Integer(_)) => Ok(AUTO_EXPOSURE_ON),
        (_, Value::Integer(v)) => Ok(*v as f64),
        (_, Value::Boolean(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        _ => Err(SourceError::Unsupported("non-numeric control value")),
    }
}

fn find_usable_camera() -> Option<usize> {
    v4l::context::enum_devices()
        .into_iter()
        .find(|dev| {
            V4lDevice::with_path(dev.path())
                .and_then(|d| d.query_caps())
                .map(|caps| {
                    caps.capabilities
                        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                })
                .unwrap_or(false)
        })
        .map(|dev| dev.index())
}

fn open_device(index: usize) -> Result<V4lDevice, SourceError> {
    if let Ok(dev) = V4lDevice::new(index)
        && dev.query_caps().is_ok()
    {
        return Ok(dev);
    }

    tracing::debug!(index, "Camera busy or missing, scanning alternatives");

    let fallback = find_usable_camera()
        .ok_or(SourceError::Unsupported("no usable video devices found"))?;
    Ok(V4lDevice::new(fallback)?)
}

/// Prefer YUYV (cheaper to decode), fall back to MJPEG.
fn select_format(device: &V4lDevice) -> Result<PixelFormat, SourceError> {
    let formats = device.enum_formats()?;

    for fmt in &formats {
        tracing::debug!(fourcc = ?fmt.fourcc, description = %fmt.description, "Available format");
    }

    if formats.iter().any(|f| f.fourcc == FOURCC_YUYV) {
        return Ok(PixelFormat::Yuyv);
    }
    if formats.iter().any(|f| f.fourcc == FOURCC_MJPG) {
        return Ok(PixelFormat::Mjpeg);
    }

    Err(SourceError::Unsupported(
        "camera supports neither YUYV nor MJPEG",
    ))
}

/// Live V4L2 camera streaming through memory-mapped buffers.
pub struct V4lSource {
    device: V4lDevice,
    stream: Option<Stream<'static>>,
    decoder: Box<dyn PixelDecoder>,
    pending: Option<Frame>,
    width: u32,
    height: u32,
    fps: f64,
}

impl V4lSource {
    pub fn open(index: usize) -> Result<Self, SourceError> {
        let device = retry_with_backoff(|| open_device(index), 10, 200, "Camera init")?;

        let caps = device.query_caps()?;
        tracing::info!(card = %caps.card, driver = %caps.driver, "Camera opened");

        let pixel_format = select_format(&device)?;
        let mut format = device.format()?;
        format.fourcc = match pixel_format {
            PixelFormat::Yuyv => FOURCC_YUYV,
            PixelFormat::Mjpeg => FOURCC_MJPG,
        };
        let format = device.set_format(&format)?;

        let params = device.params()?;
        let fps = match params.interval.numerator {
            0 => 0.0,
            n => f64::from(params.interval.denominator) / f64::from(n),
        };

        tracing::info!(
            width = format.width,
            height = format.height,
            pixel_format = ?pixel_format,
            fps,
            "Capture format negotiated"
        );

        let decoder: Box<dyn PixelDecoder> = match pixel_format {
            PixelFormat::Yuyv => Box::new(YuyvDecoder::new()),
            PixelFormat::Mjpeg => Box::new(MjpegDecoder::new()?),
        };
        let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;

        Ok(Self {
            device,
            stream: Some(stream),
            decoder,
            pending: None,
            width: format.width,
            height: format.height,
            fps,
        })
    }
}

impl FrameSource for V4lSource {
    fn grab(&mut self) -> Result<bool, SourceError> {
        self.pending = None;
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };

        let (raw, meta) = stream.next()?;
        if meta.bytesused == 0 {
            return Ok(false);
        }
        let raw = &raw[..(meta.bytesused as usize).min(raw.len())];
        let rgb = self.decoder.decode(raw, self.width, self.height)?;
        self.pending = Some(Frame::new(rgb.to_vec(), self.width, self.height));
        Ok(true)
    }

    fn retrieve(&mut self) -> Result<Frame, SourceError> {
        Ok(self.pending.take().unwrap_or_else(Frame::empty))
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Capture stream closed");
        }
        self.pending = None;
    }

    fn is_released(&self) -> bool {
        self.stream.is_none()
    }
}

impl DeviceSource for V4lSource {
    fn property(&self, property: Property) -> Result<f64, SourceError> {
        let control = self.device.control(control_id(property))?;
        from_control_value(property, &control.value)
    }

    fn set_property(&mut self, property: Property, value: f64) -> Result<(), SourceError> {
        self.device.set_control(Control {
            id: control_id(property),
            value: to_control_value(property, value),
        })?;
        Ok(())
    }
}

impl Device<V4lSource> {
    /// Open `/dev/video<index>`, falling back to the first capture-capable
    /// device when it is busy or missing.
    pub fn open(index: usize, config: EncoderConfig) -> Result<Self, CaptureError> {
        let source = V4lSource::open(index).map_err(CaptureError::Open)?;
        Self::new(source, config)
    }
}
