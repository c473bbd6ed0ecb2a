use crate::error::SourceError;
use crate::frame::Frame;
use crate::source::{FrameRecorder, RecordingSpec};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

const FALLBACK_FPS: f64 = 30.0;

/// Records raw RGB frames by piping them into an `ffmpeg` process, which
/// picks the container and codec from the output extension.
pub struct FfmpegRecorder {
    child: Child,
    stdin: Option<ChildStdin>,
    spec: RecordingSpec,
    path: PathBuf,
}

impl FfmpegRecorder {
    pub fn create(path: &Path, spec: RecordingSpec) -> Result<Self, SourceError> {
        if spec.width == 0 || spec.height == 0 {
            return Err(SourceError::Unsupported("recording requires a known frame size"));
        }

        let fps = if spec.fps > 0.0 { spec.fps } else { FALLBACK_FPS };
        let mut child = Command::new("ffmpeg")
            .args(["-y", "-v", "quiet", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", spec.width, spec.height)])
            .args(["-r", &format!("{fps}")])
            .args(["-i", "pipe:0"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SourceError::Decode("ffmpeg: no stdin pipe".to_string()))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            spec,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameRecorder for FfmpegRecorder {
    fn write(&mut self, frame: &Frame) -> Result<(), SourceError> {
        if frame.width != self.spec.width || frame.height != self.spec.height {
            return Err(SourceError::Decode(format!(
                "frame is {}x{}, recording expects {}x{}",
                frame.width, frame.height, self.spec.width, self.spec.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SourceError::Decode("recording already finished".to_string()))?;
        stdin.write_all(&frame.data)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), SourceError> {
        // Closing stdin lets ffmpeg flush and write the trailer
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if !status.success() {
            return Err(SourceError::Decode(format!(
                "ffmpeg exited with {status} while writing {}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.child.wait();
        }
    }
}
