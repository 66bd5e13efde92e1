use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{FallError, Result};

/// Binary class emitted by the classifier head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallLabel {
    NotFallen = 0,
    Fallen = 1,
}

impl FallLabel {
    /// Class index 1 is fallen; anything else counts as not fallen.
    pub fn from_class(class: i64) -> Self {
        if class == FallLabel::Fallen as i64 {
            FallLabel::Fallen
        } else {
            FallLabel::NotFallen
        }
    }

    pub fn is_fallen(self) -> bool {
        self == FallLabel::Fallen
    }
}

/// Result of one inference run.
///
/// Segment keys are 1-based frame numbers in the original video
/// (`retained_index * frame_skip + 1`). `fall_detected` holds exactly when
/// some segment is fallen. An empty mapping always carries `empty_input`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    segments: BTreeMap<u64, FallLabel>,
    fall_detected: bool,
    empty_input: bool,
}

impl Verdict {
    /// No frames could be sampled.
    pub fn empty() -> Self {
        Self {
            segments: BTreeMap::new(),
            fall_detected: false,
            empty_input: true,
        }
    }

    pub fn from_segments(segments: BTreeMap<u64, FallLabel>) -> Self {
        if segments.is_empty() {
            return Self::empty();
        }
        let fall_detected = segments.values().any(|label| label.is_fallen());
        Self {
            segments,
            fall_detected,
            empty_input: false,
        }
    }

    pub fn segments(&self) -> &BTreeMap<u64, FallLabel> {
        &self.segments
    }

    pub fn fall_detected(&self) -> bool {
        self.fall_detected
    }

    pub fn is_empty_input(&self) -> bool {
        self.empty_input
    }

    /// Frame number of the earliest fallen segment.
    pub fn first_fall(&self) -> Option<u64> {
        self.segments
            .iter()
            .find(|(_, label)| label.is_fallen())
            .map(|(&frame, _)| frame)
    }

    /// Turns the empty-input condition into [`FallError::EmptyInput`].
    pub fn non_empty(self) -> Result<Self> {
        if self.empty_input {
            Err(FallError::EmptyInput)
        } else {
            Ok(self)
        }
    }
}
