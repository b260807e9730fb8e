use std::path::PathBuf;

use burn::optim::AdamConfig;
use clap::Parser;

use crate::config::{DataSource, LaunchOptions};
use crate::device::DeviceKind;
use crate::model::CifarCnnConfig;
use crate::TrainingConfig;

/// Data-parallel training of a small CNN on CIFAR-10.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct TrainArgs {
    /// Input batch size of each worker.
    #[arg(long, alias = "batch_size", default_value_t = 64)]
    pub batch_size: usize,
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,
    /// Learning rate of a single worker.
    #[arg(long, default_value_t = 0.01)]
    pub lr: f64,
    #[arg(long, value_enum, default_value_t = DeviceKind::Cpu)]
    pub device: DeviceKind,
    /// Data loader threads of each worker.
    #[arg(long, alias = "num_inter", default_value_t = 2)]
    pub num_inter: usize,
    /// Threads of the CPU tensor kernels, 0 for the default.
    #[arg(long, alias = "num_intra", default_value_t = 0)]
    pub num_intra: usize,
    /// Number of workers, each running on its own thread.
    #[arg(long, default_value_t = 1)]
    pub workers: usize,
    #[arg(long, default_value_t = 3)]
    pub warmup_epochs: usize,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Directory holding the CIFAR-10 binary batches.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
    /// Train on N generated images instead of CIFAR-10.
    #[arg(long, value_name = "N")]
    pub synthetic: Option<usize>,
    /// Where checkpoints and run metadata are written.
    #[arg(long, default_value = ".")]
    pub artifact_dir: PathBuf,
}

impl TrainArgs {
    pub fn config(&self) -> TrainingConfig {
        TrainingConfig::new(CifarCnnConfig::new(), AdamConfig::new())
            .with_num_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_learning_rate(self.lr)
            .with_warmup_epochs(self.warmup_epochs)
            .with_num_inter(self.num_inter)
            .with_num_intra(self.num_intra)
            .with_seed(self.seed)
    }

    pub fn launch_options(&self) -> LaunchOptions {
        let data = match self.synthetic {
            Some(num_items) => DataSource::Synthetic { num_items },
            None => DataSource::Cifar10(self.data_dir.clone()),
        };

        LaunchOptions {
            workers: self.workers,
            device: self.device,
            data,
            artifact_dir: self.artifact_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_script() {
        let args = TrainArgs::try_parse_from(["cifar-train"]).unwrap();

        let config = args.config();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.num_epochs, 10);
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.num_inter, 2);
        assert_eq!(config.num_intra, 0);
        assert_eq!(config.warmup_epochs, 3);

        let options = args.launch_options();
        assert_eq!(options.workers, 1);
        assert_eq!(options.device, DeviceKind::Cpu);
        assert_eq!(options.data, DataSource::Cifar10(PathBuf::from("data")));
    }

    #[test]
    fn underscore_flags_are_accepted() {
        let args = TrainArgs::try_parse_from([
            "cifar-train",
            "--batch_size",
            "32",
            "--num_inter",
            "4",
            "--device",
            "gpu",
            "--synthetic",
            "128",
        ])
        .unwrap();

        assert_eq!(args.batch_size, 32);
        assert_eq!(args.num_inter, 4);
        assert_eq!(args.device, DeviceKind::Gpu);
        assert_eq!(
            args.launch_options().data,
            DataSource::Synthetic { num_items: 128 }
        );
    }

    #[test]
    fn unknown_device_is_rejected() {
        assert!(TrainArgs::try_parse_from(["cifar-train", "--device", "tpu"]).is_err());
    }
}
