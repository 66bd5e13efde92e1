use serde::{Deserialize, Serialize};

use crate::error::PoseError;

/// COCO keypoint count emitted by YOLO pose models.
pub const DEFAULT_NUM_JOINTS: usize = 17;

/// A single body landmark in normalised image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Joint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl Joint {
    pub const ZERO: Joint = Joint {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        visibility: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }

    /// Non-finite coordinates are replaced by zero.
    pub fn sanitized(self) -> Self {
        let clean = |v: f32| if v.is_finite() { v } else { 0.0 };
        Self {
            x: clean(self.x),
            y: clean(self.y),
            z: clean(self.z),
            visibility: clean(self.visibility),
        }
    }
}

/// Which per-joint values end up in the channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Xy,
    Xyz,
    XyzVisibility,
}

impl ChannelLayout {
    pub fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            2 => Some(Self::Xy),
            3 => Some(Self::Xyz),
            4 => Some(Self::XyzVisibility),
            _ => None,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            Self::Xy => 2,
            Self::Xyz => 3,
            Self::XyzVisibility => 4,
        }
    }

    pub(crate) fn write(self, joint: &Joint, out: &mut [f32]) {
        out[0] = joint.x;
        out[1] = joint.y;
        if let Self::Xyz | Self::XyzVisibility = self {
            out[2] = joint.z;
        }
        if let Self::XyzVisibility = self {
            out[3] = joint.visibility;
        }
    }
}

/// Exactly `J` joints for one video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseFrame {
    joints: Vec<Joint>,
}

impl PoseFrame {
    pub fn new(joints: Vec<Joint>, expected: usize) -> Result<Self, PoseError> {
        if joints.len() != expected {
            return Err(PoseError::JointCount {
                expected,
                actual: joints.len(),
            });
        }
        Ok(Self {
            joints: joints.into_iter().map(Joint::sanitized).collect(),
        })
    }

    /// Placeholder used when the extractor finds nobody in the frame.
    pub fn zeros(num_joints: usize) -> Self {
        Self {
            joints: vec![Joint::ZERO; num_joints],
        }
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_frame_has_fixed_length() {
        let frame = PoseFrame::zeros(DEFAULT_NUM_JOINTS);
        assert_eq!(frame.len(), 17);
        assert!(frame.joints().iter().all(|j| *j == Joint::ZERO));
    }

    #[test]
    fn test_wrong_joint_count_rejected() {
        let err = PoseFrame::new(vec![Joint::ZERO; 33], 17).unwrap_err();
        assert!(matches!(
            err,
            PoseError::JointCount {
                expected: 17,
                actual: 33
            }
        ));
    }

    #[test]
    fn test_non_finite_coordinates_zeroed() {
        let frame = PoseFrame::new(vec![Joint::new(f32::NAN, 0.5, f32::INFINITY, 0.9)], 1).unwrap();
        assert_eq!(frame.joints()[0], Joint::new(0.0, 0.5, 0.0, 0.9));
    }

    #[test]
    fn test_layout_writes_prefix() {
        let joint = Joint::new(0.1, 0.2, 0.3, 0.4);
        let mut out = [9.0; 4];
        ChannelLayout::Xy.write(&joint, &mut out[..2]);
        assert_eq!(&out[..2], &[0.1, 0.2]);
        ChannelLayout::XyzVisibility.write(&joint, &mut out);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(ChannelLayout::from_channels(3), Some(ChannelLayout::Xyz));
        assert_eq!(ChannelLayout::from_channels(5), None);
    }
}
