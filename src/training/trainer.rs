use serde::Serialize;
use tch::nn::{self, OptimizerConfig};
use tch::Device;

use super::dataset::{DataLoader, FallDataset};
use crate::config::TrainingConfig;
use crate::error::{ConfigError, DatasetError, FallError, Result};
use crate::model::FallClassifier;

/// Per-epoch summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    pub train_loss: f64,
    /// `100 * correct / total`, `None` when there is no validation data.
    pub val_accuracy: Option<f64>,
}

/// Owns the classifier for the duration of training.
pub struct Trainer {
    model: FallClassifier,
    optimizer: nn::Optimizer,
    config: TrainingConfig,
    train: FallDataset,
    val: FallDataset,
}

impl Trainer {
    /// Fails with [`FallError::ShapeMismatch`] when either dataset's joint
    /// count differs from the network's.
    pub fn new(
        model: FallClassifier,
        config: TrainingConfig,
        train: FallDataset,
        val: FallDataset,
    ) -> Result<Self> {
        let joints = model.spec().num_joints;
        for (what, data) in [("training data joints", &train), ("validation data joints", &val)] {
            if !data.is_empty() && data.num_joints() != joints {
                return Err(FallError::shape_mismatch(
                    what,
                    vec![joints as i64],
                    vec![data.num_joints() as i64],
                ));
            }
        }
        if train.is_empty() {
            return Err(DatasetError::Empty.into());
        }
        if config.batch_size == 0 {
            return Err(ConfigError::invalid_value("training.batch_size", "must be > 0").into());
        }

        let optimizer = nn::Adam::default().build(model.var_store(), config.learning_rate)?;

        tracing::info!(
            train = train.len(),
            val = val.len(),
            parameters = model.num_parameters(),
            batch_size = config.batch_size,
            learning_rate = config.learning_rate,
            "trainer ready"
        );

        Ok(Self {
            model,
            optimizer,
            config,
            train,
            val,
        })
    }

    pub fn model(&self) -> &FallClassifier {
        &self.model
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Runs `config.epochs` epochs, then writes the parameters to
    /// `config.checkpoint`.
    pub fn fit(&mut self) -> Result<Vec<EpochReport>> {
        let mut reports = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let train_loss = self.train_epoch(epoch)?;
            let val_accuracy = self.evaluate()?;
            match val_accuracy {
                Some(acc) => tracing::info!(
                    epoch,
                    epochs = self.config.epochs,
                    loss = train_loss,
                    val_accuracy = acc,
                    "epoch finished"
                ),
                None => tracing::info!(
                    epoch,
                    epochs = self.config.epochs,
                    loss = train_loss,
                    "epoch finished"
                ),
            }
            reports.push(EpochReport {
                epoch,
                train_loss,
                val_accuracy,
            });
        }
        self.model.save(&self.config.checkpoint)?;
        Ok(reports)
    }

    /// One pass over the shuffled training set; returns the mean batch loss.
    pub fn train_epoch(&mut self, epoch: usize) -> Result<f64> {
        let loader = DataLoader::new(
            &self.train,
            self.config.batch_size,
            true,
            self.config.seed.wrapping_add(epoch as u64),
            self.model.device(),
        );

        let mut total = 0.0;
        let mut batches = 0usize;
        for batch in loader.iter() {
            let batch = batch?;
            let logits = self.model.forward_t(&batch.inputs, true)?;
            let loss = logits.cross_entropy_for_logits(&batch.labels);
            self.optimizer.backward_step(&loss);
            total += loss.double_value(&[]);
            batches += 1;
        }
        tracing::debug!(epoch, batches, "training pass done");
        Ok(if batches == 0 { 0.0 } else { total / batches as f64 })
    }

    /// Accuracy over the validation set in dataset order.
    pub fn evaluate(&self) -> Result<Option<f64>> {
        if self.val.is_empty() {
            return Ok(None);
        }
        let loader = DataLoader::new(
            &self.val,
            self.config.batch_size,
            false,
            0,
            self.model.device(),
        );

        let mut correct = 0usize;
        let mut total = 0usize;
        for batch in loader.iter() {
            let batch = batch?;
            let predicted = self.model.predict(&batch.inputs)?;
            let expected = Vec::<i64>::try_from(&batch.labels.to_device(Device::Cpu))?;
            correct += predicted
                .iter()
                .zip(&expected)
                .filter(|(p, e)| p == e)
                .count();
            total += expected.len();
        }
        Ok(Some(100.0 * correct as f64 / total as f64))
    }

    /// Hands the trained network back, dropping optimizer state.
    pub fn into_classifier(self) -> FallClassifier {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JointAdjacency, ModelSpec};
    use ndarray::Array4;

    fn spec(num_joints: usize) -> ModelSpec {
        ModelSpec {
            num_joints,
            num_classes: 2,
            hidden_channels: 8,
            temporal_kernel: 3,
            adjacency: JointAdjacency::Dense,
        }
    }

    /// Fallen samples are bright, standing ones dark.
    fn separable(n: usize, joints: usize) -> FallDataset {
        let labels: Vec<i64> = (0..n).map(|i| (i % 2) as i64).collect();
        let sequences = Array4::from_shape_fn((n, 4, joints, 2), |(i, _, _, _)| {
            if labels[i] == 1 {
                1.0
            } else {
                -1.0
            }
        });
        FallDataset::new(sequences, labels).unwrap()
    }

    fn config(dir: &std::path::Path) -> TrainingConfig {
        TrainingConfig {
            batch_size: 4,
            epochs: 3,
            learning_rate: 0.01,
            checkpoint: dir.join("fall.safetensors"),
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_joint_mismatch_fails_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let model = FallClassifier::new(spec(5), Device::Cpu).unwrap();
        let data = separable(4, 6);
        let err = Trainer::new(model, config(dir.path()), data.clone(), data).err().unwrap();
        assert!(matches!(err, FallError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_fit_reports_every_epoch_and_saves() {
        tch::manual_seed(42);
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let (train, val) = separable(12, 5).split(0.25, 42);
        let model = FallClassifier::new(spec(5), Device::Cpu).unwrap();

        let mut trainer = Trainer::new(model, cfg.clone(), train, val).unwrap();
        let reports = trainer.fit().unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].epoch, 1);
        for report in &reports {
            assert!(report.train_loss.is_finite());
            let acc = report.val_accuracy.unwrap();
            assert!((0.0..=100.0).contains(&acc));
        }
        assert!(cfg.checkpoint.exists());

        let trained = trainer.into_classifier();
        let restored = FallClassifier::from_checkpoint(&cfg.checkpoint, Device::Cpu).unwrap();
        let xs = tch::Tensor::ones([1, 1, 4, 5], (tch::Kind::Float, Device::Cpu));
        assert!(trained
            .logits(&xs)
            .unwrap()
            .allclose(&restored.logits(&xs).unwrap(), 1e-6, 1e-6, false));
    }

    #[test]
    fn test_empty_validation_gives_no_accuracy() {
        let dir = tempfile::tempdir().unwrap();
        let (train, val) = separable(6, 3).split(0.0, 1);
        let model = FallClassifier::new(spec(3), Device::Cpu).unwrap();
        let trainer = Trainer::new(model, config(dir.path()), train, val).unwrap();
        assert_eq!(trainer.evaluate().unwrap(), None);
    }

    #[test]
    fn test_trained_predictions_are_deterministic() {
        tch::manual_seed(0);
        let dir = tempfile::tempdir().unwrap();
        let data = separable(8, 4);
        let (train, val) = data.split(0.0, 0);
        let model = FallClassifier::new(spec(4), Device::Cpu).unwrap();
        let mut trainer = Trainer::new(model, config(dir.path()), train, val).unwrap();
        trainer.train_epoch(1).unwrap();

        let model = trainer.into_classifier();
        let xs = tch::Tensor::ones([2, 1, 4, 4], (tch::Kind::Float, Device::Cpu));
        let logits = model.logits(&xs).unwrap();
        let first = model.predict(&xs).unwrap();
        assert_eq!(first, model.predict(&xs).unwrap());
        let gap = (logits.get(0).double_value(&[0]) - logits.get(0).double_value(&[1])).abs();
        assert!(gap > 0.0);
    }
}
