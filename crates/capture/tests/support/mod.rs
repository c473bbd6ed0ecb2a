#![allow(dead_code)]

use capture::{
    DeviceSource, Frame, FrameRecorder, FrameSource, Property, RecordingSpec, SeekableSource,
    SourceError,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 2;

/// Everything a [`ScriptedSource`] was asked to do, shared with the test.
#[derive(Debug, Default)]
pub struct Calls {
    pub grabs: Vec<usize>,
    pub seeks: Vec<usize>,
    pub set_properties: Vec<(Property, f64)>,
    pub recordings: Vec<(PathBuf, RecordingSpec)>,
    pub recorded_frames: usize,
    pub finished_recordings: usize,
    pub fail_fast: bool,
    pub released: bool,
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Calls>>);

impl CallLog {
    pub fn calls(&self) -> MutexGuard<'_, Calls> {
        self.0.lock().unwrap()
    }

    pub fn grab_count(&self) -> usize {
        self.calls().grabs.len()
    }
}

/// Deterministic seekable device/file stand-in. Frame `i` is a solid frame
/// filled with `i as u8`; the position is the index the next grab returns.
pub struct ScriptedSource {
    frame_count: usize,
    fps: f64,
    position: usize,
    current: Option<usize>,
    failing: HashSet<usize>,
    grab_delay: Duration,
    properties: HashMap<Property, f64>,
    released: bool,
    log: CallLog,
}

impl ScriptedSource {
    /// A clip of `frame_count` frames ticking every millisecond.
    pub fn new(frame_count: usize) -> (Self, CallLog) {
        let log = CallLog::default();
        let source = Self {
            frame_count,
            fps: 1000.0,
            position: 0,
            current: None,
            failing: HashSet::new(),
            grab_delay: Duration::ZERO,
            properties: HashMap::new(),
            released: false,
            log: log.clone(),
        };
        (source, log)
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    /// Every grab blocks for `delay`, like a stalled device.
    pub fn with_grab_delay(mut self, delay: Duration) -> Self {
        self.grab_delay = delay;
        self
    }

    /// `retrieve` fails for these frame indices.
    pub fn failing_at(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(indices);
        self
    }
}

impl FrameSource for ScriptedSource {
    fn grab(&mut self) -> Result<bool, SourceError> {
        self.current = None;
        if self.released || self.position >= self.frame_count {
            return Ok(false);
        }
        if !self.grab_delay.is_zero() {
            std::thread::sleep(self.grab_delay);
        }
        self.log.calls().grabs.push(self.position);
        self.current = Some(self.position);
        self.position += 1;
        Ok(true)
    }

    fn retrieve(&mut self) -> Result<Frame, SourceError> {
        match self.current {
            Some(index) if self.failing.contains(&index) => {
                Err(SourceError::Decode(format!("scripted failure at {index}")))
            }
            Some(index) => Ok(solid_frame(index as u8)),
            None => Ok(Frame::empty()),
        }
    }

    fn width(&self) -> u32 {
        WIDTH
    }

    fn height(&self) -> u32 {
        HEIGHT
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn set_fail_fast(&mut self, enabled: bool) {
        self.log.calls().fail_fast = enabled;
    }

    fn release(&mut self) {
        self.released = true;
        self.log.calls().released = true;
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl SeekableSource for ScriptedSource {
    fn position(&self) -> usize {
        self.position
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn seek(&mut self, index: usize) -> Result<(), SourceError> {
        self.log.calls().seeks.push(index);
        self.position = index.min(self.frame_count);
        Ok(())
    }
}

impl DeviceSource for ScriptedSource {
    fn property(&self, property: Property) -> Result<f64, SourceError> {
        Ok(self.properties.get(&property).copied().unwrap_or(0.0))
    }

    fn set_property(&mut self, property: Property, value: f64) -> Result<(), SourceError> {
        self.log.calls().set_properties.push((property, value));
        self.properties.insert(property, value);
        Ok(())
    }

    fn open_recorder(
        &self,
        path: &Path,
        spec: RecordingSpec,
    ) -> Result<Box<dyn FrameRecorder>, SourceError> {
        self.log
            .calls()
            .recordings
            .push((path.to_path_buf(), spec));
        Ok(Box::new(CountingRecorder {
            log: self.log.clone(),
        }))
    }
}

struct CountingRecorder {
    log: CallLog,
}

impl FrameRecorder for CountingRecorder {
    fn write(&mut self, _frame: &Frame) -> Result<(), SourceError> {
        self.log.calls().recorded_frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), SourceError> {
        self.log.calls().finished_recordings += 1;
        Ok(())
    }
}

pub fn solid_frame(value: u8) -> Frame {
    Frame::new(
        vec![value; Frame::expected_len(WIDTH, HEIGHT)],
        WIDTH,
        HEIGHT,
    )
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// A small animated GIF with `frames` solid frames, 40ms each.
pub fn gif_bytes(frames: u8) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut bytes, WIDTH as u16, HEIGHT as u16, &[]).unwrap();
        for i in 0..frames {
            let pixels = vec![i.wrapping_mul(40); Frame::expected_len(WIDTH, HEIGHT)];
            let mut frame = gif::Frame::from_rgb(WIDTH as u16, HEIGHT as u16, &pixels);
            frame.delay = 4;
            encoder.write_frame(&frame).unwrap();
        }
    }
    bytes
}
