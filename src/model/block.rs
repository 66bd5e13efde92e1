use tch::nn::{self, ModuleT};
use tch::{Device, Tensor};

use super::adjacency::JointAdjacency;

/// `(left, right)` padding that keeps an axis the same length after a
/// stride-1 convolution with an odd or even kernel.
pub(crate) fn same_padding(kernel: i64) -> (i64, i64) {
    let total = (kernel - 1).max(0);
    let left = total / 2;
    (left, total - left)
}

#[derive(Debug)]
enum SpatialMixing {
    /// `[out, in, 1, J]` kernel over the zero-padded joint axis.
    FullWidth {
        weight: Tensor,
        bias: Tensor,
        width: i64,
    },
    /// 1x1 projection followed by `x @ A_norm` along the joint axis.
    Graph {
        weight: Tensor,
        bias: Tensor,
        adjacency: Tensor,
    },
}

impl SpatialMixing {
    fn forward(&self, xs: &Tensor) -> Tensor {
        match self {
            Self::FullWidth {
                weight,
                bias,
                width,
            } => {
                let (left, right) = same_padding(*width);
                xs.constant_pad_nd([left, right, 0, 0])
                    .conv2d(weight, Some(bias), [1, 1], [0, 0], [1, 1], 1)
            }
            Self::Graph {
                weight,
                bias,
                adjacency,
            } => xs
                .conv2d(weight, Some(bias), [1, 1], [0, 0], [1, 1], 1)
                .matmul(adjacency),
        }
    }
}

/// Spatial conv, ReLU, temporal conv, ReLU, batch norm.
///
/// Input and output are `(B, C, T, J)`; only the channel count changes.
/// The time axis is padded by edge replication so that a constant sequence
/// produces a constant feature map whatever its length.
#[derive(Debug)]
pub struct SpatioTemporalBlock {
    spatial: SpatialMixing,
    temporal_weight: Tensor,
    temporal_bias: Tensor,
    temporal_kernel: i64,
    norm: nn::BatchNorm,
}

impl SpatioTemporalBlock {
    pub fn new(
        p: nn::Path,
        in_channels: i64,
        out_channels: i64,
        num_joints: i64,
        temporal_kernel: i64,
        adjacency: &JointAdjacency,
    ) -> Self {
        let spatial_path = &p / "spatial";
        let spatial = match adjacency.normalized(num_joints as usize) {
            None => SpatialMixing::FullWidth {
                weight: spatial_path.kaiming_uniform(
                    "weight",
                    &[out_channels, in_channels, 1, num_joints],
                ),
                bias: spatial_path.zeros("bias", &[out_channels]),
                width: num_joints,
            },
            Some(matrix) => {
                let values: Vec<f32> = matrix.iter().copied().collect();
                let adjacency = Tensor::from_slice(&values)
                    .reshape([num_joints, num_joints])
                    .to_device(p.device());
                SpatialMixing::Graph {
                    weight: spatial_path
                        .kaiming_uniform("weight", &[out_channels, in_channels, 1, 1]),
                    bias: spatial_path.zeros("bias", &[out_channels]),
                    adjacency,
                }
            }
        };

        let temporal_path = &p / "temporal";
        let temporal_weight = temporal_path.kaiming_uniform(
            "weight",
            &[out_channels, out_channels, temporal_kernel, 1],
        );
        let temporal_bias = temporal_path.zeros("bias", &[out_channels]);
        let norm = nn::batch_norm2d(&p / "norm", out_channels, Default::default());

        Self {
            spatial,
            temporal_weight,
            temporal_bias,
            temporal_kernel,
            norm,
        }
    }

    pub fn device(&self) -> Device {
        self.temporal_weight.device()
    }
}

impl ModuleT for SpatioTemporalBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let (top, bottom) = same_padding(self.temporal_kernel);
        self.spatial
            .forward(xs)
            .relu()
            .replication_pad2d([0, 0, top, bottom])
            .conv2d(
                &self.temporal_weight,
                Some(&self.temporal_bias),
                [1, 1],
                [0, 0],
                [1, 1],
                1,
            )
            .relu()
            .apply_t(&self.norm, train)
    }
}
