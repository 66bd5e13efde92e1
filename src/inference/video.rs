use std::path::{Path, PathBuf};

use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};

use crate::error::Result;

/// Sequential, blocking frame reader.
///
/// `Ok(None)` marks end of stream. Sources are read once, front to back.
pub trait FrameSource {
    type Frame;

    fn next_frame(&mut self) -> Result<Option<Self::Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    type Frame = S::Frame;

    fn next_frame(&mut self) -> Result<Option<Self::Frame>> {
        (**self).next_frame()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    type Frame = S::Frame;

    fn next_frame(&mut self) -> Result<Option<Self::Frame>> {
        (**self).next_frame()
    }
}

/// Frames from any iterator; used for synthetic input.
pub struct IterSource<I>(pub I);

impl<I: Iterator> FrameSource for IterSource<I> {
    type Frame = I::Item;

    fn next_frame(&mut self) -> Result<Option<Self::Frame>> {
        Ok(self.0.next())
    }
}

/// Video file decoded through OpenCV.
///
/// A file that cannot be opened behaves as an empty stream, and a decode
/// failure part-way through ends the stream. Both are logged; neither is an
/// error, so the caller sees an empty or truncated frame set.
pub struct VideoFileSource {
    path: PathBuf,
    capture: Option<VideoCapture>,
    frames_read: u64,
}

impl VideoFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let capture = match Self::try_open(&path) {
            Ok(Some(capture)) => Some(capture),
            Ok(None) => {
                tracing::warn!(path = %path.display(), "video could not be opened");
                None
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "video could not be opened");
                None
            }
        };
        Self {
            path,
            capture,
            frames_read: 0,
        }
    }

    fn try_open(path: &Path) -> opencv::Result<Option<VideoCapture>> {
        let capture = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Ok(None);
        }
        let frame_count = capture.get(videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
        let fps = capture.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
        tracing::debug!(
            path = %path.display(),
            frame_count,
            fps,
            "video opened"
        );
        Ok(Some(capture))
    }

    pub fn is_opened(&self) -> bool {
        self.capture.is_some()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::debug!(path = %self.path.display(), error = %e, "release failed");
            }
        }
    }
}

impl FrameSource for VideoFileSource {
    type Frame = Mat;

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let Some(capture) = self.capture.as_mut() else {
            return Ok(None);
        };

        let mut frame = Mat::default();
        match capture.read(&mut frame) {
            Ok(true) if !frame.empty() => {
                self.frames_read += 1;
                Ok(Some(frame))
            }
            Ok(_) => {
                tracing::debug!(
                    path = %self.path.display(),
                    frames = self.frames_read,
                    "end of video"
                );
                self.close();
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    frame = self.frames_read,
                    error = %e,
                    "frame read failed, ending stream"
                );
                self.close();
                Ok(None)
            }
        }
    }
}

impl Drop for VideoFileSource {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn encode_jpeg(mat: &Mat) -> Option<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    let params = Vector::<i32>::new();
    imgcodecs::imencode(".jpg", mat, &mut buf, &params).ok()?;
    Some(buf.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty_stream() {
        let mut source = VideoFileSource::open("/nonexistent/clip.mp4");
        assert!(!source.is_opened());
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.frames_read(), 0);
    }

    #[test]
    fn test_corrupt_file_is_empty_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp4");
        std::fs::write(&path, b"definitely not a video").unwrap();
        let mut source = VideoFileSource::open(&path);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_iter_source() {
        let mut source = IterSource(vec![1, 2].into_iter());
        assert_eq!(source.next_frame().unwrap(), Some(1));
        assert_eq!(source.next_frame().unwrap(), Some(2));
        assert_eq!(source.next_frame().unwrap(), None);
    }

    #[test]
    fn test_encode_empty_mat_fails() {
        assert!(encode_jpeg(&Mat::default()).is_none());
    }
}
