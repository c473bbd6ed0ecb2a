use crate::error::SourceError;
use crate::frame::Frame;
use crate::source::{FrameSource, OpenPath, SeekableSource};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

// GIF delays are in centiseconds; tiny delays are treated as 20ms like browsers do
const MIN_GIF_DELAY_MS: u32 = 20;

/// Seekable source over frames already decoded into memory.
pub struct MemorySource {
    frames: Vec<Frame>,
    width: u32,
    height: u32,
    fps: f64,
    position: usize,
    current: Option<usize>,
    released: bool,
}

impl MemorySource {
    pub fn from_frames(frames: Vec<Frame>, fps: f64) -> Self {
        let (width, height) = frames.first().map_or((0, 0), |f| (f.width, f.height));
        Self {
            frames,
            width,
            height,
            fps,
            position: 0,
            current: None,
            released: false,
        }
    }

    /// Decode every frame of an animated GIF, compositing partial frames.
    pub fn decode_gif(reader: impl Read) -> Result<Self, SourceError> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options
            .read_info(reader)
            .map_err(|e| SourceError::Decode(format!("GIF header: {e}")))?;

        let width = u32::from(decoder.width());
        let height = u32::from(decoder.height());
        let mut canvas = vec![0u8; width as usize * height as usize * 4];
        let mut frames = Vec::new();
        let mut total_delay_ms = 0u64;

        while let Some(frame) = decoder
            .read_next_frame()
            .map_err(|e| SourceError::Decode(format!("GIF frame: {e}")))?
        {
            total_delay_ms += u64::from((u32::from(frame.delay) * 10).max(MIN_GIF_DELAY_MS));

            let (fx, fy) = (u32::from(frame.left), u32::from(frame.top));
            let (fw, fh) = (u32::from(frame.width), u32::from(frame.height));
            let previous = matches!(frame.dispose, gif::DisposalMethod::Previous)
                .then(|| canvas.clone());

            for y in 0..fh {
                for x in 0..fw {
                    let (dx, dy) = (fx + x, fy + y);
                    if dx >= width || dy >= height {
                        continue;
                    }
                    let src = ((y * fw + x) * 4) as usize;
                    let px = &frame.buffer[src..src + 4];
                    // Transparent pixels keep the previous frame's content
                    if px[3] > 0 {
                        let dst = ((dy * width + dx) * 4) as usize;
                        canvas[dst..dst + 4].copy_from_slice(px);
                    }
                }
            }

            let rgb = canvas
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect();
            frames.push(Frame::new(rgb, width, height));

            match frame.dispose {
                gif::DisposalMethod::Background => {
                    for dy in fy..(fy + fh).min(height) {
                        let start = ((dy * width + fx.min(width)) * 4) as usize;
                        let end = ((dy * width + (fx + fw).min(width)) * 4) as usize;
                        canvas[start..end].fill(0);
                    }
                }
                gif::DisposalMethod::Previous => {
                    if let Some(previous) = previous {
                        canvas = previous;
                    }
                }
                _ => {}
            }
        }

        if frames.is_empty() {
            return Err(SourceError::Decode("GIF has no frames".to_string()));
        }

        let fps = 1000.0 * frames.len() as f64 / total_delay_ms as f64;
        tracing::debug!(width, height, frames = frames.len(), fps, "Decoded GIF");

        Ok(Self::from_frames(frames, fps))
    }
}

impl OpenPath for MemorySource {
    fn open_path(path: &Path) -> Result<Self, SourceError> {
        Self::decode_gif(BufReader::new(File::open(path)?))
    }
}

impl FrameSource for MemorySource {
    fn grab(&mut self) -> Result<bool, SourceError> {
        if self.released || self.position >= self.frames.len() {
            self.current = None;
            return Ok(false);
        }
        self.current = Some(self.position);
        self.position += 1;
        Ok(true)
    }

    fn retrieve(&mut self) -> Result<Frame, SourceError> {
        Ok(self
            .current
            .and_then(|i| self.frames.get(i))
            .cloned()
            .unwrap_or_default())
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
        self.released = true;
        self.current = None;
        self.frames = Vec::new();
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl SeekableSource for MemorySource {
    fn position(&self) -> usize {
        self.position
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn seek(&mut self, index: usize) -> Result<(), SourceError> {
        self.position = index.min(self.frames.len());
        self.current = None;
        Ok(())
    }
}
