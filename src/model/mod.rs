//! Spatio-temporal graph convolution classifier.
//!
//! ```text
//! (B, 1, T, J)
//!      │
//!      ▼
//! ┌──────────────────────┐
//! │ block 1 → hidden     │  spatial conv, relu, temporal conv, relu, bn
//! └──────────────────────┘
//!      │
//!      ▼
//! ┌──────────────────────┐
//! │ block hidden → hidden│
//! └──────────────────────┘
//!      │  adaptive average pool over (T, J)
//!      ▼
//! ┌──────────────────────┐
//! │ linear → num_classes │
//! └──────────────────────┘
//! ```

mod adjacency;
mod block;
mod checkpoint;
mod classifier;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use adjacency::JointAdjacency;
pub use block::SpatioTemporalBlock;
pub use checkpoint::{sidecar_path, CheckpointMeta, CHECKPOINT_FORMAT_VERSION};
pub use classifier::FallClassifier;

/// Structural hyper-parameters. Two classifiers built from equal specs
/// have interchangeable parameter sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub num_joints: usize,
    pub num_classes: usize,
    pub hidden_channels: usize,
    pub temporal_kernel: usize,
    #[serde(default)]
    pub adjacency: JointAdjacency,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            num_joints: crate::pose::DEFAULT_NUM_JOINTS,
            num_classes: 2,
            hidden_channels: 64,
            temporal_kernel: 3,
            adjacency: JointAdjacency::Dense,
        }
    }
}

impl ModelSpec {
    /// Field names match the `[model]` config section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_joints == 0 {
            return Err(ConfigError::invalid_value("model.num_joints", "must be > 0"));
        }
        if self.num_classes < 2 {
            return Err(ConfigError::invalid_value("model.num_classes", "must be >= 2"));
        }
        if self.hidden_channels == 0 {
            return Err(ConfigError::invalid_value(
                "model.hidden_channels",
                "must be > 0",
            ));
        }
        if self.temporal_kernel == 0 {
            return Err(ConfigError::invalid_value(
                "model.temporal_kernel",
                "must be > 0",
            ));
        }
        if let Some(joint) = self.adjacency.invalid_joint(self.num_joints) {
            return Err(ConfigError::invalid_value(
                "model.edges",
                format!("joint {joint} is outside 0..{}", self.num_joints),
            ));
        }
        Ok(())
    }
}
