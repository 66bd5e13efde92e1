use ndarray::{Array3, Array4, ArrayView4, Axis};
use tch::{Device, Tensor};

use super::joint::{ChannelLayout, PoseFrame};
use crate::error::{FallError, Result};

/// A `(T, J, C)` block of joint coordinates forming one classification unit.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSequence {
    data: Array3<f32>,
}

impl PoseSequence {
    pub fn frames(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn num_joints(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn channels(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Single-channel network input `(1, 1, T, J)`.
    pub fn to_model_input(&self) -> Array4<f32> {
        let batched = self.data.view().insert_axis(Axis(0));
        collapse_channels(batched)
    }

    /// [`PoseSequence::to_model_input`] on `device`.
    pub fn to_tensor(&self, device: Device) -> Result<Tensor> {
        array_to_tensor(&self.to_model_input(), device)
    }
}

/// Averages `(N, T, J, C)` over `C` into `(N, 1, T, J)`.
pub fn collapse_channels(batch: ArrayView4<f32>) -> Array4<f32> {
    let (n, t, j, _) = batch.dim();
    match batch.mean_axis(Axis(3)) {
        Some(mean) => mean.insert_axis(Axis(1)),
        None => Array4::zeros((n, 1, t, j)),
    }
}

pub fn array_to_tensor(array: &Array4<f32>, device: Device) -> Result<Tensor> {
    let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
    let contiguous = array.as_standard_layout();
    let values = contiguous.as_slice().ok_or_else(|| {
        FallError::shape_mismatch("contiguous input", shape.clone(), Vec::new())
    })?;
    Ok(Tensor::from_slice(values)
        .reshape(shape.as_slice())
        .to_device(device))
}

/// Stacks per-frame detections into a [`PoseSequence`], zero-filling frames
/// where the extractor found nobody.
pub struct PoseSequenceBuilder {
    num_joints: usize,
    layout: ChannelLayout,
    values: Vec<f32>,
    frames: usize,
    missing: usize,
}

impl PoseSequenceBuilder {
    pub fn new(num_joints: usize, layout: ChannelLayout) -> Self {
        Self {
            num_joints,
            layout,
            values: Vec::new(),
            frames: 0,
            missing: 0,
        }
    }

    pub fn push(&mut self, detection: Option<PoseFrame>) -> Result<()> {
        let frame = match detection {
            Some(frame) => {
                if frame.len() != self.num_joints {
                    return Err(FallError::shape_mismatch(
                        "pose frame joints",
                        vec![self.num_joints as i64],
                        vec![frame.len() as i64],
                    ));
                }
                frame
            }
            None => {
                tracing::debug!(frame = self.frames, "no pose detected, substituting zeros");
                self.missing += 1;
                PoseFrame::zeros(self.num_joints)
            }
        };

        let channels = self.layout.channels();
        let offset = self.values.len();
        self.values.resize(offset + self.num_joints * channels, 0.0);
        for (i, joint) in frame.joints().iter().enumerate() {
            let start = offset + i * channels;
            self.layout
                .write(joint, &mut self.values[start..start + channels]);
        }
        self.frames += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Frames that were zero-filled.
    pub fn missing(&self) -> usize {
        self.missing
    }

    pub fn build(self) -> PoseSequence {
        let shape = (self.frames, self.num_joints, self.layout.channels());
        let data = Array3::from_shape_vec(shape, self.values)
            .unwrap_or_else(|_| Array3::zeros(shape));
        PoseSequence { data }
    }
}
