use std::path::PathBuf;

use burn::optim::AdamConfig;
use burn::prelude::*;

use crate::device::DeviceKind;
use crate::model::CifarCnnConfig;

#[derive(Config)]
pub struct TrainingConfig {
    pub model: CifarCnnConfig,
    pub optimizer: AdamConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    /// Learning rate of a single worker; it is multiplied by the number of workers.
    #[config(default = 0.01)]
    pub learning_rate: f64,
    #[config(default = 3)]
    pub warmup_epochs: usize,
    /// Data loader threads per worker.
    #[config(default = 2)]
    pub num_inter: usize,
    /// Threads of the CPU tensor kernels, `0` for the runtime default.
    #[config(default = 0)]
    pub num_intra: usize,
    #[config(default = 42)]
    pub seed: u64,
}

/// Where the training images come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataSource {
    /// The CIFAR-10 binary batches found in a directory.
    Cifar10(PathBuf),
    /// Random class-dependent images, for runs without the dataset.
    Synthetic { num_items: usize },
}

/// How a training run is laid out on the machine.
#[derive(Clone, Debug)]
pub struct LaunchOptions {
    pub workers: usize,
    pub device: DeviceKind,
    pub data: DataSource,
    /// Receives the checkpoints, `config.json` and `metrics.json`.
    pub artifact_dir: PathBuf,
}
