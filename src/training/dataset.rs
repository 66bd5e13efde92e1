//! Labelled pose sequences and mini-batching.
//!
//! On disk a dataset is a directory with two parallel arrays:
//!
//! ```text
//! sequences.npy   float32 (N, T, J, C)   or (N, T, J) for single-channel data
//! labels.npy      integer (N,)           0 = not fallen, 1 = fallen
//! ```
//!
//! Channels are averaged away on load, the same reduction the inference
//! pipeline applies, so batches are always `(B, 1, T, J)`.

use std::path::{Path, PathBuf};

use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tch::{Device, Kind, Tensor};

use crate::error::{DatasetError, FallError, Result};
use crate::pose::{array_to_tensor, collapse_channels};

pub const SEQUENCES_FILE: &str = "sequences.npy";
pub const LABELS_FILE: &str = "labels.npy";

/// In-memory set of `(sequence, label)` pairs.
#[derive(Debug, Clone)]
pub struct FallDataset {
    /// `(N, 1, T, J)` after channel reduction.
    inputs: Array4<f32>,
    labels: Vec<i64>,
}

impl FallDataset {
    /// Builds a dataset from raw `(N, T, J, C)` sequences.
    pub fn new(sequences: Array4<f32>, labels: Vec<i64>) -> std::result::Result<Self, DatasetError> {
        let n = sequences.len_of(Axis(0));
        if n != labels.len() {
            return Err(DatasetError::LengthMismatch {
                sequences: n,
                labels: labels.len(),
            });
        }
        if n == 0 {
            return Err(DatasetError::Empty);
        }
        if let Some((index, &label)) = labels
            .iter()
            .enumerate()
            .find(|&(_, &l)| l != 0 && l != 1)
        {
            return Err(DatasetError::InvalidLabel { index, label });
        }

        Ok(Self {
            inputs: collapse_channels(sequences.view()),
            labels,
        })
    }

    /// Loads `sequences.npy` and `labels.npy` from `dir`.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_npy(dir.join(SEQUENCES_FILE), dir.join(LABELS_FILE))
    }

    pub fn from_npy<P: AsRef<Path>, Q: AsRef<Path>>(sequences: P, labels: Q) -> Result<Self> {
        let sequences_path = sequences.as_ref();
        let labels_path = labels.as_ref();

        let sequences = read_npy(sequences_path)?;
        let sequences = match sequences.size().as_slice() {
            &[_, _, _, _] => sequences,
            &[_, _, _] => sequences.unsqueeze(-1),
            other => {
                return Err(DatasetError::BadShape {
                    path: sequences_path.to_path_buf(),
                    shape: other.to_vec(),
                    expected: "(N, T, J, C)",
                }
                .into())
            }
        };
        let shape: Vec<usize> = sequences.size().iter().map(|&d| d as usize).collect();
        let values = Vec::<f32>::try_from(&sequences.to_kind(Kind::Float).flatten(0, -1))?;
        let sequences = Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]), values)
            .map_err(|_| DatasetError::BadShape {
                path: sequences_path.to_path_buf(),
                shape: shape.iter().map(|&d| d as i64).collect(),
                expected: "(N, T, J, C)",
            })?;

        let labels = read_npy(labels_path)?;
        if labels.dim() != 1 {
            return Err(DatasetError::BadShape {
                path: labels_path.to_path_buf(),
                shape: labels.size(),
                expected: "(N,)",
            }
            .into());
        }
        let labels = Vec::<i64>::try_from(&labels.to_kind(Kind::Int64))?;

        let dataset = Self::new(sequences, labels)?;
        tracing::info!(
            path = %sequences_path.display(),
            samples = dataset.len(),
            frames = dataset.frames(),
            joints = dataset.num_joints(),
            fallen = dataset.count_label(1),
            "dataset loaded"
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn frames(&self) -> usize {
        self.inputs.len_of(Axis(2))
    }

    pub fn num_joints(&self) -> usize {
        self.inputs.len_of(Axis(3))
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    pub fn count_label(&self, label: i64) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Seeded split into `(train, validation)`. The validation part holds
    /// `round(len * val_fraction)` samples and may be empty.
    pub fn split(&self, val_fraction: f64, seed: u64) -> (FallDataset, FallDataset) {
        let n = self.len();
        let n_val = ((n as f64) * val_fraction.clamp(0.0, 1.0)).round() as usize;
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));

        let (val_idx, train_idx) = indices.split_at(n_val.min(n));
        let mut val_idx = val_idx.to_vec();
        let mut train_idx = train_idx.to_vec();
        val_idx.sort_unstable();
        train_idx.sort_unstable();
        (self.subset(&train_idx), self.subset(&val_idx))
    }

    fn subset(&self, indices: &[usize]) -> FallDataset {
        FallDataset {
            inputs: self.inputs.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    fn batch(&self, indices: &[usize], device: Device) -> Result<Batch> {
        let inputs = array_to_tensor(&self.inputs.select(Axis(0), indices), device)?;
        let targets: Vec<i64> = indices.iter().map(|&i| self.labels[i]).collect();
        Ok(Batch {
            inputs,
            labels: Tensor::from_slice(&targets).to_device(device),
        })
    }
}

fn read_npy(path: &Path) -> Result<Tensor> {
    if !path.exists() {
        return Err(FallError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        )));
    }
    Tensor::read_npy(path).map_err(|source| {
        DatasetError::Npy {
            path: PathBuf::from(path),
            source,
        }
        .into()
    })
}

/// One mini-batch: `inputs` is `(B, 1, T, J)` float, `labels` is `(B,)` int64.
#[derive(Debug)]
pub struct Batch {
    pub inputs: Tensor,
    pub labels: Tensor,
}

/// Batched iterator over a [`FallDataset`].
///
/// With `shuffle` the order is a seeded permutation, identical for equal
/// seeds; without it batches follow dataset order. The last batch may be
/// short.
pub struct DataLoader<'a> {
    dataset: &'a FallDataset,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    device: Device,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        dataset: &'a FallDataset,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
        device: Device,
    ) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            seed,
            device,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Sample order for one pass.
    pub fn order(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            indices.shuffle(&mut StdRng::seed_from_u64(self.seed));
        }
        indices
    }

    pub fn iter(&self) -> DataLoaderIter<'a> {
        DataLoaderIter {
            dataset: self.dataset,
            indices: self.order(),
            batch_size: self.batch_size,
            cursor: 0,
            device: self.device,
        }
    }
}

pub struct DataLoaderIter<'a> {
    dataset: &'a FallDataset,
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    device: Device,
}

impl Iterator for DataLoaderIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.indices.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch = self.dataset.batch(&self.indices[self.cursor..end], self.device);
        self.cursor = end;
        Some(batch)
    }
}
