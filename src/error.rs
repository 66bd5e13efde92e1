//! Error types shared across the crate.
//!
//! ```text
//! FallError
//! ├── ConfigError   (config file read / parse / validation)
//! ├── DatasetError  (npy loading, label/sequence agreement)
//! ├── PoseError     (pose extractor runtime and output decoding)
//! └── AlertError    (notification transport)
//! ```
//!
//! A frame with no detected pose is not an error: the sequence builder
//! substitutes a zero-filled frame and carries on.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FallError>;

#[derive(Debug, Error)]
pub enum FallError {
    /// Joint or channel count disagrees between data and network.
    #[error("shape mismatch in {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    /// No frames were sampled from the video source.
    #[error("no frames could be sampled from the input")]
    EmptyInput,

    /// Persisted parameters do not structurally match the network.
    #[error("checkpoint {path:?} is incompatible: {reason}")]
    CheckpointIncompatible { path: PathBuf, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Pose(#[from] PoseError),

    #[error("video error: {0}")]
    Video(#[from] opencv::Error),

    #[error(transparent)]
    Alert(#[from] AlertError),

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FallError {
    pub fn shape_mismatch(what: &'static str, expected: Vec<i64>, actual: Vec<i64>) -> Self {
        FallError::ShapeMismatch {
            what,
            expected,
            actual,
        }
    }

    pub fn incompatible(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        FallError::CheckpointIncompatible {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("cannot read `{path}`: {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: tch::TchError,
    },
    #[error("`{path}` has shape {shape:?}, expected {expected}")]
    BadShape {
        path: PathBuf,
        shape: Vec<i64>,
        expected: &'static str,
    },
    #[error("{sequences} sequences but {labels} labels")]
    LengthMismatch { sequences: usize, labels: usize },
    #[error("label {label} at index {index} is not 0 or 1")]
    InvalidLabel { index: usize, label: i64 },
    #[error("dataset is empty")]
    Empty,
}

#[derive(Debug, Error)]
pub enum PoseError {
    #[error("onnx runtime error: {0}")]
    Runtime(String),
    #[error("image preprocessing failed: {0}")]
    Preprocess(#[from] opencv::Error),
    #[error("unexpected pose model output: {0}")]
    Output(String),
    #[error("pose frame has {actual} joints, expected {expected}")]
    JointCount { expected: usize, actual: usize },
    #[error("pose model emits {actual} keypoints per person, expected {expected}")]
    KeypointCount { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to encode verdict: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_display() {
        let err = FallError::shape_mismatch("joint axis", vec![33], vec![17]);
        assert_eq!(
            err.to_string(),
            "shape mismatch in joint axis: expected [33], got [17]"
        );
    }

    #[test]
    fn test_config_error_converts() {
        let err: FallError = ConfigError::invalid_value("frame_skip", "must be > 0").into();
        assert!(matches!(err, FallError::Config(_)));
        assert_eq!(err.to_string(), "invalid value for `frame_skip`: must be > 0");
    }
}
