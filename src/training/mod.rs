mod dataset;
mod trainer;

pub use dataset::{Batch, DataLoader, DataLoaderIter, FallDataset, LABELS_FILE, SEQUENCES_FILE};
pub use trainer::{EpochReport, Trainer};
