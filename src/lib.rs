//! Fall detection from video with a spatio-temporal convolutional classifier
//! over body-joint sequences.
//!
//! ```text
//! video → FrameSampler → PoseExtractor → PoseSequenceBuilder
//!       → FallClassifier (windowed) → Verdict → AlertDispatcher
//! ```

pub mod alert;
pub mod api;
pub mod config;
pub mod error;
pub mod inference;
pub mod model;
pub mod pose;
pub mod training;

pub use error::{FallError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
