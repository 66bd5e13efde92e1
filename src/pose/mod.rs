mod extractor;
mod joint;
mod onnx;
mod sequence;

pub use extractor::PoseExtractor;
pub use joint::{ChannelLayout, Joint, PoseFrame, DEFAULT_NUM_JOINTS};
pub use onnx::{decode_best_pose, Letterbox, OnnxPoseExtractor};
pub use sequence::{array_to_tensor, collapse_channels, PoseSequence, PoseSequenceBuilder};
