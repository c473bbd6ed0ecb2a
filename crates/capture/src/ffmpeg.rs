//! File source backed by `ffmpeg`/`ffprobe` subprocesses.
//!
//! `ffprobe` reports geometry, rate and length once at open time; `ffmpeg`
//! then streams `rgb24` frames over a pipe. Seeking restarts the decoder at
//! the requested frame.

use crate::error::SourceError;
use crate::frame::Frame;
use crate::source::{FrameSource, OpenPath, SeekableSource};
use serde::Deserialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::OnceLock;

const DEFAULT_FPS: f64 = 30.0;

/// Check whether `ffmpeg` and `ffprobe` can be executed. Cached per process.
pub fn ffmpeg_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        ["ffmpeg", "ffprobe"].iter().all(|bin| {
            Command::new(bin)
                .arg("-version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok_and(|s| s.success())
        })
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// 0 when the container reports neither a frame count nor a duration.
    pub frame_count: usize,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `num/den` or plain decimal frame rates.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Extract metadata from `ffprobe -print_format json -show_streams -show_format`.
pub fn parse_probe(json: &[u8]) -> Result<VideoMeta, SourceError> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| SourceError::Probe(format!("invalid ffprobe JSON: {e}")))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| SourceError::Probe("no video stream".to_string()))?;

    let width = stream
        .width
        .ok_or_else(|| SourceError::Probe("missing width".to_string()))?;
    let height = stream
        .height
        .ok_or_else(|| SourceError::Probe("missing height".to_string()))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(DEFAULT_FPS);

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<usize>().ok())
        .or_else(|| duration.map(|d| (d * fps).round() as usize))
        .unwrap_or(0);

    Ok(VideoMeta {
        width,
        height,
        fps,
        frame_count,
    })
}

pub fn probe_video(path: &Path) -> Result<VideoMeta, SourceError> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-show_format"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| SourceError::Probe(format!("ffprobe failed to execute: {e}")))?;

    if !output.status.success() {
        return Err(SourceError::Probe(format!(
            "ffprobe exited with {} for {}",
            output.status,
            path.display()
        )));
    }

    parse_probe(&output.stdout)
}

struct DecodeProcess {
    child: Child,
    stdout: ChildStdout,
}

impl DecodeProcess {
    fn spawn(path: &Path, meta: &VideoMeta, start_frame: usize) -> io::Result<Self> {
        let mut command = Command::new("ffmpeg");
        command.args(["-v", "quiet", "-nostdin"]);
        if start_frame > 0 {
            // Input-side seek; ffmpeg decodes and discards up to the exact frame
            command.args(["-ss", &format!("{:.6}", start_frame as f64 / meta.fps)]);
        }
        let mut child = command
            .arg("-i")
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", meta.width, meta.height)])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("ffmpeg: no stdout pipe"))?;

        Ok(Self { child, stdout })
    }

    fn kill(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Seekable file source decoding through an `ffmpeg` subprocess.
pub struct FfmpegSource {
    path: PathBuf,
    meta: VideoMeta,
    process: Option<DecodeProcess>,
    buffer: Vec<u8>,
    position: usize,
    grabbed: bool,
    released: bool,
}

impl FfmpegSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let meta = probe_video(&path)?;
        let process = DecodeProcess::spawn(&path, &meta, 0)?;

        tracing::info!(
            path = %path.display(),
            width = meta.width,
            height = meta.height,
            fps = meta.fps,
            frames = meta.frame_count,
            "Opened video file"
        );

        Ok(Self {
            buffer: vec![0; Frame::expected_len(meta.width, meta.height)],
            path,
            meta,
            process: Some(process),
            position: 0,
            grabbed: false,
            released: false,
        })
    }

    pub fn meta(&self) -> &VideoMeta {
        &self.meta
    }
}

impl OpenPath for FfmpegSource {
    fn open_path(path: &Path) -> Result<Self, SourceError> {
        Self::open(path)
    }
}

impl FrameSource for FfmpegSource {
    fn grab(&mut self) -> Result<bool, SourceError> {
        self.grabbed = false;
        let Some(process) = self.process.as_mut() else {
            return Ok(false);
        };

        match process.stdout.read_exact(&mut self.buffer) {
            Ok(()) => {
                self.position += 1;
                self.grabbed = true;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn retrieve(&mut self) -> Result<Frame, SourceError> {
        if !self.grabbed {
            return Ok(Frame::empty());
        }
        Ok(Frame::new(
            self.buffer.clone(),
            self.meta.width,
            self.meta.height,
        ))
    }

    fn width(&self) -> u32 {
        self.meta.width
    }

    fn height(&self) -> u32 {
        self.meta.height
    }

    fn fps(&self) -> f64 {
        self.meta.fps
    }

    fn release(&mut self) {
        if let Some(process) = self.process.take() {
            process.kill();
        }
        self.grabbed = false;
        self.released = true;
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl SeekableSource for FfmpegSource {
    fn position(&self) -> usize {
        self.position
    }

    fn frame_count(&self) -> usize {
        self.meta.frame_count
    }

    fn seek(&mut self, index: usize) -> Result<(), SourceError> {
        if self.released {
            return Err(SourceError::Unsupported("seek on a released source"));
        }
        let index = match self.meta.frame_count {
            0 => index,
            count => index.min(count),
        };

        if let Some(process) = self.process.take() {
            process.kill();
        }
        self.process = Some(DecodeProcess::spawn(&self.path, &self.meta, index)?);
        self.position = index;
        self.grabbed = false;
        Ok(())
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}
