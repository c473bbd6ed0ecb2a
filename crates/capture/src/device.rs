//! Device controller for live capture sources: pass-through controls and an
//! optional recording sink fed from the pre-tick hook.

use crate::decoder::{Decoder, DecoderCore, lock};
use crate::encoder::FrameEncoder;
use crate::error::CaptureError;
use crate::format::EncoderConfig;
use crate::frame::EncodedFrame;
use crate::source::{DeviceSource, FrameRecorder, Property, RecordingSpec};
use crate::state::DecoderState;
use std::path::Path;
use std::sync::{Arc, Mutex};

// Driver convention for CAP_PROP_AUTO_EXPOSURE on V4L2 backends
pub const AUTO_EXPOSURE_ON: f64 = 0.25;
pub const AUTO_EXPOSURE_OFF: f64 = 0.75;

// Typical UVC focus range: 0..=255 in steps of 5
const FOCUS_STEPS: f64 = 51.0;
const FOCUS_INCREMENT: f64 = 5.0;

/// Map a focus percentage onto the device's native step range.
pub fn focus_to_device(percent: u8) -> f64 {
    (FOCUS_STEPS * f64::from(percent) / 100.0).floor() * FOCUS_INCREMENT
}

type RecorderSlot = Arc<Mutex<Option<Box<dyn FrameRecorder>>>>;

#[derive(Debug, Default)]
struct ControlCache {
    focus: u8,
    auto_exposure: bool,
}

fn pre_tick<S: DeviceSource>(core: &DecoderCore<S>, recorder: &RecorderSlot) {
    let mut slot = lock(recorder);
    let Some(recorder) = slot.as_mut() else {
        return;
    };
    if let Some(frame) = core.latest_decoded()
        && let Err(e) = recorder.write(&frame)
    {
        tracing::warn!(error = %e, "Failed to write frame to recording");
    }
}

pub struct Device<S: DeviceSource> {
    decoder: Decoder<S>,
    controls: Mutex<ControlCache>,
    recorder: RecorderSlot,
}

impl<S: DeviceSource> Device<S> {
    pub fn new(source: S, config: EncoderConfig) -> Result<Self, CaptureError> {
        Ok(Self::from_decoder(Decoder::new(source, config)?))
    }

    pub fn with_encoder(
        source: S,
        config: EncoderConfig,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Result<Self, CaptureError> {
        Ok(Self::from_decoder(Decoder::with_encoder(
            source, config, encoder,
        )?))
    }

    fn from_decoder(decoder: Decoder<S>) -> Self {
        let recorder: RecorderSlot = Arc::new(Mutex::new(None));
        let hook_recorder = recorder.clone();
        let span = tracing::info_span!("device", format = %decoder.config().format());
        let decoder = decoder
            .with_span(span)
            .with_pre_tick(Box::new(move |core: &DecoderCore<S>| {
                pre_tick(core, &hook_recorder)
            }));

        Self {
            decoder,
            controls: Mutex::new(ControlCache::default()),
            recorder,
        }
    }

    pub fn start(&self) -> Result<(), CaptureError> {
        self.decoder.start()
    }

    pub fn pause(&self) -> bool {
        self.decoder.pause()
    }

    pub fn resume(&self) -> bool {
        self.decoder.resume()
    }

    pub fn stop(&self, wait_for_worker: bool) {
        self.decoder.stop(wait_for_worker);
    }

    /// Read a raw device control.
    pub fn property(&self, property: Property) -> Result<f64, CaptureError> {
        Ok(self.decoder.core().with_source(|s| s.property(property))?)
    }

    /// Write a raw device control. Unsupported controls are left to the
    /// driver to ignore or reject.
    pub fn set_property(&self, property: Property, value: f64) -> Result<(), CaptureError> {
        self.decoder
            .core()
            .with_source(|s| s.set_property(property, value))?;
        Ok(())
    }

    pub fn saturation(&self) -> Result<f64, CaptureError> {
        self.property(Property::Saturation)
    }

    pub fn set_saturation(&self, value: f64) -> Result<(), CaptureError> {
        self.set_property(Property::Saturation, value)
    }

    pub fn contrast(&self) -> Result<f64, CaptureError> {
        self.property(Property::Contrast)
    }

    pub fn set_contrast(&self, value: f64) -> Result<(), CaptureError> {
        self.set_property(Property::Contrast, value)
    }

    pub fn exposure(&self) -> Result<f64, CaptureError> {
        self.property(Property::Exposure)
    }

    pub fn set_exposure(&self, value: f64) -> Result<(), CaptureError> {
        self.set_property(Property::Exposure, value)
    }

    pub fn gain(&self) -> Result<f64, CaptureError> {
        self.property(Property::Gain)
    }

    pub fn set_gain(&self, value: f64) -> Result<(), CaptureError> {
        self.set_property(Property::Gain, value)
    }

    pub fn hue(&self) -> Result<f64, CaptureError> {
        self.property(Property::Hue)
    }

    pub fn set_hue(&self, value: f64) -> Result<(), CaptureError> {
        self.set_property(Property::Hue, value)
    }

    pub fn auto_focus(&self) -> Result<bool, CaptureError> {
        Ok(self.property(Property::AutoFocus)? != 0.0)
    }

    pub fn set_auto_focus(&self, enabled: bool) -> Result<(), CaptureError> {
        self.set_property(Property::AutoFocus, if enabled { 1.0 } else { 0.0 })
    }

    /// Last focus written through [`Device::set_focus`], in percent.
    pub fn focus(&self) -> u8 {
        lock(&self.controls).focus
    }

    /// Set focus in percent (0-100). Writing the current value is a no-op.
    pub fn set_focus(&self, percent: i32) -> Result<(), CaptureError> {
        let percent = u8::try_from(percent)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| {
                CaptureError::InvalidArgument(format!("focus {percent} must be between 0 and 100"))
            })?;

        let mut controls = lock(&self.controls);
        if controls.focus == percent {
            return Ok(());
        }

        self.set_property(Property::Focus, focus_to_device(percent))?;
        controls.focus = percent;
        Ok(())
    }

    pub fn auto_exposure(&self) -> bool {
        lock(&self.controls).auto_exposure
    }

    /// Toggle auto exposure. Writing the current value is a no-op.
    pub fn set_auto_exposure(&self, enabled: bool) -> Result<(), CaptureError> {
        let mut controls = lock(&self.controls);
        if controls.auto_exposure == enabled {
            return Ok(());
        }

        let sentinel = if enabled {
            AUTO_EXPOSURE_ON
        } else {
            AUTO_EXPOSURE_OFF
        };
        self.set_property(Property::AutoExposure, sentinel)?;
        controls.auto_exposure = enabled;
        Ok(())
    }

    /// Start recording decoded frames to `path` at the current size and rate.
    /// Fails if a recording is already active.
    pub fn record(&self, path: impl AsRef<Path>) -> Result<(), CaptureError> {
        let path = path.as_ref();
        let mut slot = lock(&self.recorder);
        if slot.is_some() {
            return Err(CaptureError::RecordingActive);
        }

        let (width, height) = self.decoder.size();
        let spec = RecordingSpec {
            width,
            height,
            fps: self.decoder.fps(),
        };
        let recorder = self
            .decoder
            .core()
            .with_source(|s| s.open_recorder(path, spec))?;

        *slot = Some(recorder);
        tracing::info!(path = %path.display(), width, height, fps = spec.fps, "Recording started");
        Ok(())
    }

    /// Close the active recording. Fails if there is none.
    pub fn save(&self) -> Result<(), CaptureError> {
        let recorder = lock(&self.recorder)
            .take()
            .ok_or(CaptureError::NoRecording)?;
        recorder.finish()?;
        tracing::info!("Recording saved");
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.recorder).is_some()
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

impl<S: DeviceSource> Drop for Device<S> {
    fn drop(&mut self) {
        self.decoder.stop(true);

        if let Some(recorder) = lock(&self.recorder).take()
            && let Err(e) = recorder.finish()
        {
            tracing::warn!(error = %e, "Failed to finalise recording on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_mapping_endpoints() {
        assert_eq!(focus_to_device(0), 0.0);
        assert_eq!(focus_to_device(100), 255.0);
    }

    #[test]
    fn focus_mapping_snaps_to_steps() {
        // 51 * 0.5 = 25.5 -> 25 steps
        assert_eq!(focus_to_device(50), 125.0);
        // 51 * 0.01 = 0.51 -> 0 steps
        assert_eq!(focus_to_device(1), 0.0);
        // 51 * 0.02 = 1.02 -> 1 step
        assert_eq!(focus_to_device(2), 5.0);
    }

    #[test]
    fn focus_mapping_is_monotonic() {
        let values: Vec<f64> = (0..=100).map(focus_to_device).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert!(values.iter().all(|v| v % FOCUS_INCREMENT == 0.0));
    }
}
