mod detector;
mod pipeline;
mod sampler;
mod verdict;
mod video;

pub use detector::{build_alert, VideoDetector};
pub use pipeline::{Detection, InferencePipeline, Stage};
pub use sampler::{FrameSampler, SampledFrame};
pub use verdict::{FallLabel, Verdict};
pub use video::{encode_jpeg, FrameSource, IterSource, VideoFileSource};
