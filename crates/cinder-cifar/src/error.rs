use cinder_collective::CollectiveError;

use crate::data::DatasetError;
use crate::device::DeviceKind;

#[derive(thiserror::Error, Debug)]
pub enum TrainingError {
    #[error("Collective operation failed: {0}")]
    Collective(#[from] CollectiveError),
    #[error("Failed to load the dataset: {0}")]
    Dataset(#[from] DatasetError),
    #[error(
        "{nsamples} samples are not enough for one step of {batch_size} images on {workers} workers"
    )]
    EmptyEpoch {
        nsamples: usize,
        workers: usize,
        batch_size: usize,
    },
    #[error("Device '{0}' is not available in this build")]
    DeviceUnavailable(DeviceKind),
    #[error("Failed to save checkpoint {path}: {reason}")]
    Checkpoint { path: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize metrics: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),
}

impl TrainingError {
    /// Whether this error only reports that another worker stopped first.
    pub fn is_peer_left(&self) -> bool {
        matches!(
            self,
            TrainingError::Collective(CollectiveError::PeerLeft { .. })
        )
    }
}
