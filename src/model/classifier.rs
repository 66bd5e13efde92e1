use std::path::Path;

use tch::nn::{self, Module, ModuleT};
use tch::{Device, Kind, Tensor};

use super::block::SpatioTemporalBlock;
use super::{checkpoint, ModelSpec};
use crate::error::{FallError, Result};

/// Two spatio-temporal blocks, global average pooling and a linear head.
///
/// Accepts `(B, T, J)`, `(B, T, J, 1)` or `(B, 1, T, J)` and returns
/// `(B, num_classes)` logits. Multi-channel pose data is averaged into one
/// channel before it gets here (see [`crate::pose::collapse_channels`]).
pub struct FallClassifier {
    vs: nn::VarStore,
    spec: ModelSpec,
    blocks: Vec<SpatioTemporalBlock>,
    head: nn::Linear,
}

impl std::fmt::Debug for FallClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallClassifier")
            .field("spec", &self.spec)
            .field("device", &self.vs.device())
            .finish()
    }
}

impl FallClassifier {
    /// Fresh, randomly initialised network on `device`.
    pub fn new(spec: ModelSpec, device: Device) -> Result<Self> {
        spec.validate()?;
        let vs = nn::VarStore::new(device);
        let root = vs.root();

        let joints = spec.num_joints as i64;
        let hidden = spec.hidden_channels as i64;
        let kernel = spec.temporal_kernel as i64;
        let blocks = vec![
            SpatioTemporalBlock::new(&root / "block1", 1, hidden, joints, kernel, &spec.adjacency),
            SpatioTemporalBlock::new(
                &root / "block2",
                hidden,
                hidden,
                joints,
                kernel,
                &spec.adjacency,
            ),
        ];
        let head = nn::linear(
            &root / "head",
            hidden,
            spec.num_classes as i64,
            Default::default(),
        );

        Ok(Self {
            vs,
            spec,
            blocks,
            head,
        })
    }

    /// Network described by `spec` with parameters read from `path`.
    ///
    /// Fails with [`FallError::CheckpointIncompatible`] if the checkpoint
    /// was written for a different spec, even one whose parameter shapes
    /// happen to agree (two edge sets over the same joints).
    pub fn load<P: AsRef<Path>>(path: P, spec: ModelSpec, device: Device) -> Result<Self> {
        let path = path.as_ref();
        let meta = checkpoint::read_meta(path)?;
        if meta.spec != spec {
            return Err(FallError::incompatible(
                path,
                format!("written for {:?}, expected {:?}", meta.spec, spec),
            ));
        }
        Self::restore(path, meta.spec, device)
    }

    /// Like [`FallClassifier::load`], taking the spec from the checkpoint's
    /// metadata file.
    pub fn from_checkpoint<P: AsRef<Path>>(path: P, device: Device) -> Result<Self> {
        let path = path.as_ref();
        let meta = checkpoint::read_meta(path)?;
        Self::restore(path, meta.spec, device)
    }

    fn restore(path: &Path, spec: ModelSpec, device: Device) -> Result<Self> {
        let model = Self::new(spec, device)?;
        checkpoint::load_strict(&model.vs, path)?;
        tracing::info!(
            path = %path.display(),
            parameters = model.num_parameters(),
            "classifier loaded"
        );
        Ok(model)
    }

    /// Writes parameters and architecture metadata.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        checkpoint::save(&self.vs, &self.spec, path)?;
        tracing::info!(path = %path.display(), "classifier saved");
        Ok(())
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn num_parameters(&self) -> usize {
        self.vs
            .trainable_variables()
            .iter()
            .map(|t| t.numel())
            .sum()
    }

    /// Forward pass; `train` selects batch statistics over running ones.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut hidden = self.to_input_layout(xs)?;
        for block in &self.blocks {
            hidden = block.forward_t(&hidden, train);
        }
        let pooled = hidden.adaptive_avg_pool2d([1, 1]).flatten(1, -1);
        Ok(self.head.forward(&pooled))
    }

    /// Evaluation-mode logits without gradient tracking.
    pub fn logits(&self, xs: &Tensor) -> Result<Tensor> {
        tch::no_grad(|| self.forward_t(xs, false))
    }

    /// Arg-max class per batch element. Ties resolve to the lowest index.
    pub fn predict(&self, xs: &Tensor) -> Result<Vec<i64>> {
        let logits = self.logits(xs)?;
        argmax_rows(&logits)
    }

    fn to_input_layout(&self, xs: &Tensor) -> Result<Tensor> {
        let joints = self.spec.num_joints as i64;
        let size = xs.size();
        let input = match size.as_slice() {
            &[b, t, j] if b > 0 && t > 0 && j == joints => xs.unsqueeze(1),
            &[b, 1, t, j] if b > 0 && t > 0 && j == joints => xs.shallow_clone(),
            &[b, t, j, 1] if b > 0 && t > 0 && j == joints => xs.permute([0, 3, 1, 2]),
            _ => {
                return Err(FallError::shape_mismatch(
                    "classifier input (B, 1, T, J)",
                    vec![-1, 1, -1, joints],
                    size.clone(),
                ))
            }
        };
        Ok(input.to_kind(Kind::Float).to_device(self.device()))
    }
}

/// Row-wise arg-max of a `(B, C)` tensor, lowest index on ties.
pub(crate) fn argmax_rows(logits: &Tensor) -> Result<Vec<i64>> {
    let size = logits.size();
    let &[rows, cols] = size.as_slice() else {
        return Err(FallError::shape_mismatch("logits", vec![-1, -1], size.clone()));
    };
    let values: Vec<f32> = Vec::<f32>::try_from(
        logits
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous()
            .view(-1),
    )?;

    let cols = cols as usize;
    Ok((0..rows as usize)
        .map(|r| {
            let row = &values[r * cols..(r + 1) * cols];
            let mut best = 0;
            for (i, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = i;
                }
            }
            best as i64
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JointAdjacency;

    fn small_spec() -> ModelSpec {
        ModelSpec {
            num_joints: 5,
            num_classes: 2,
            hidden_channels: 8,
            temporal_kernel: 3,
            adjacency: JointAdjacency::Dense,
        }
    }

    fn cpu() -> (Kind, Device) {
        (Kind::Float, Device::Cpu)
    }

    #[test]
    fn test_accepted_layouts_give_same_logits() {
        tch::manual_seed(7);
        let model = FallClassifier::new(small_spec(), Device::Cpu).unwrap();
        let base = Tensor::randn([3, 6, 5], cpu());

        let a = model.logits(&base).unwrap();
        let b = model.logits(&base.unsqueeze(1)).unwrap();
        let c = model.logits(&base.unsqueeze(3)).unwrap();
        assert_eq!(a.size(), vec![3, 2]);
        assert!(a.allclose(&b, 1e-6, 1e-6, false));
        assert!(a.allclose(&c, 1e-6, 1e-6, false));
    }

    #[test]
    fn test_joint_mismatch_rejected() {
        let model = FallClassifier::new(small_spec(), Device::Cpu).unwrap();
        let err = model.logits(&Tensor::zeros([1, 1, 4, 7], cpu())).unwrap_err();
        assert!(matches!(err, FallError::ShapeMismatch { .. }));
        let err = model.logits(&Tensor::zeros([1, 2, 4, 5], cpu())).unwrap_err();
        assert!(matches!(err, FallError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_empty_time_axis_rejected() {
        let model = FallClassifier::new(small_spec(), Device::Cpu).unwrap();
        let err = model.logits(&Tensor::zeros([1, 1, 0, 5], cpu())).unwrap_err();
        assert!(matches!(err, FallError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_pooling_makes_constant_sequences_length_invariant() {
        tch::manual_seed(3);
        let model = FallClassifier::new(small_spec(), Device::Cpu).unwrap();
        let frame = Tensor::randn([1, 1, 1, 5], cpu());

        let short = model.logits(&frame.repeat([1, 1, 2, 1])).unwrap();
        let long = model.logits(&frame.repeat([1, 1, 17, 1])).unwrap();
        assert!(short.allclose(&long, 1e-4, 1e-5, false));
    }

    #[test]
    fn test_single_frame_is_classified() {
        let model = FallClassifier::new(small_spec(), Device::Cpu).unwrap();
        let labels = model.predict(&Tensor::zeros([1, 1, 1, 5], cpu())).unwrap();
        assert_eq!(labels.len(), 1);
        assert!(labels[0] == 0 || labels[0] == 1);
    }

    #[test]
    fn test_graph_adjacency_forward() {
        let spec = ModelSpec {
            adjacency: JointAdjacency::Graph(vec![[0, 1], [1, 2], [2, 3], [3, 4]]),
            ..small_spec()
        };
        let model = FallClassifier::new(spec, Device::Cpu).unwrap();
        let logits = model.logits(&Tensor::randn([2, 4, 5], cpu())).unwrap();
        assert_eq!(logits.size(), vec![2, 2]);
    }

    #[test]
    fn test_argmax_ties_pick_lowest_index() {
        let logits = Tensor::from_slice(&[0.5f32, 0.5, 0.1, 0.9]).reshape([2, 2]);
        assert_eq!(argmax_rows(&logits).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/model.safetensors");
        let model = FallClassifier::new(small_spec(), Device::Cpu).unwrap();
        model.save(&path).unwrap();
        assert!(checkpoint::sidecar_path(&path).exists());

        let restored = FallClassifier::from_checkpoint(&path, Device::Cpu).unwrap();
        assert_eq!(restored.spec(), model.spec());

        let xs = Tensor::randn([2, 1, 4, 5], cpu());
        let before = model.logits(&xs).unwrap();
        let after = restored.logits(&xs).unwrap();
        assert!(before.allclose(&after, 1e-6, 1e-6, false));
    }

    #[test]
    fn test_load_with_other_spec_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        FallClassifier::new(small_spec(), Device::Cpu)
            .unwrap()
            .save(&path)
            .unwrap();

        let wider = ModelSpec {
            hidden_channels: 16,
            ..small_spec()
        };
        let err = FallClassifier::load(&path, wider, Device::Cpu).unwrap_err();
        assert!(matches!(err, FallError::CheckpointIncompatible { .. }));

        let graph = ModelSpec {
            adjacency: JointAdjacency::Graph(vec![[0, 1]]),
            ..small_spec()
        };
        let err = FallClassifier::load(&path, graph, Device::Cpu).unwrap_err();
        assert!(matches!(err, FallError::CheckpointIncompatible { .. }));
    }

    #[test]
    fn test_load_with_other_edge_set_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.safetensors");
        let trained_on = ModelSpec {
            adjacency: JointAdjacency::Graph(vec![[0, 1]]),
            ..small_spec()
        };
        FallClassifier::new(trained_on.clone(), Device::Cpu)
            .unwrap()
            .save(&path)
            .unwrap();

        let other_edges = ModelSpec {
            adjacency: JointAdjacency::Graph(vec![[1, 2]]),
            ..small_spec()
        };
        let err = FallClassifier::load(&path, other_edges, Device::Cpu).unwrap_err();
        assert!(matches!(err, FallError::CheckpointIncompatible { .. }));

        let restored = FallClassifier::load(&path, trained_on.clone(), Device::Cpu).unwrap();
        assert_eq!(restored.spec(), &trained_on);
    }

    #[test]
    fn test_missing_checkpoint_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FallClassifier::load(dir.path().join("absent.safetensors"), small_spec(), Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, FallError::Io(_)));
    }
}
