use super::video::FrameSource;
use crate::error::Result;

/// A frame kept by the sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledFrame<F> {
    /// 0-based position in the source stream.
    pub index: u64,
    /// 0-based position among retained frames.
    pub retained: usize,
    pub frame: F,
}

impl<F> SampledFrame<F> {
    /// 1-based frame number used as the segment key.
    pub fn frame_number(&self) -> u64 {
        self.index + 1
    }
}

/// Keeps frames `0, skip, 2 * skip, ...` and drops the rest, so a stream of
/// `N` frames yields `ceil(N / skip)` samples.
pub struct FrameSampler<S> {
    source: S,
    skip: u64,
    position: u64,
    retained: usize,
    finished: bool,
}

impl<S: FrameSource> FrameSampler<S> {
    /// `skip` of 0 is treated as 1.
    pub fn new(source: S, skip: usize) -> Self {
        Self {
            source,
            skip: skip.max(1) as u64,
            position: 0,
            retained: 0,
            finished: false,
        }
    }

    /// Frames read from the source so far, kept or not.
    pub fn frames_seen(&self) -> u64 {
        self.position
    }

    pub fn retained(&self) -> usize {
        self.retained
    }

    pub fn next_sample(&mut self) -> Result<Option<SampledFrame<S::Frame>>> {
        while !self.finished {
            let Some(frame) = self.source.next_frame()? else {
                self.finished = true;
                break;
            };
            let index = self.position;
            self.position += 1;
            if index % self.skip != 0 {
                continue;
            }
            let sample = SampledFrame {
                index,
                retained: self.retained,
                frame,
            };
            self.retained += 1;
            return Ok(Some(sample));
        }
        Ok(None)
    }
}

impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = Result<SampledFrame<S::Frame>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_sample() {
            Ok(Some(sample)) => Some(Ok(sample)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
