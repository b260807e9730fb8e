use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};
use burn::config::Config;
use burn::data::dataset::Dataset;
use burn::tensor::backend::AutodiffBackend;
use cinder_collective::Communicator;

use crate::config::{DataSource, LaunchOptions};
use crate::data::CifarDataset;
use crate::device::{self, DeviceKind};
use crate::training::{train_worker, EpochMetrics, WorkerOutcome};
use crate::{TrainingConfig, TrainingError};

/// Result of a whole training run, as seen by rank 0.
#[derive(Clone, Debug)]
pub struct TrainingReport {
    pub workers: usize,
    pub history: Vec<EpochMetrics>,
    pub elapsed: Duration,
}

/// Trains with one thread per worker and waits for all of them.
///
/// Rank 0 writes `config.json` and `metrics.json` to the artifact directory and
/// prints the total training time.
pub fn launch(
    config: TrainingConfig,
    options: LaunchOptions,
) -> Result<TrainingReport, TrainingError> {
    let started = Instant::now();

    let comms = cinder_collective::init(options.workers)?;
    let workers = comms.len();
    if workers != options.workers {
        log::warn!(
            "Requested {} workers but running with {workers}",
            options.workers
        );
    }

    if !options.device.is_available() {
        return Err(TrainingError::DeviceUnavailable(options.device));
    }
    if options.device == DeviceKind::Cpu {
        device::configure_intra_op_threads(config.num_intra);
    }

    std::fs::create_dir_all(&options.artifact_dir)?;
    let dataset = Arc::new(load_dataset(&options.data, config.seed)?);
    log::info!("Training on {} images with {workers} workers", dataset.len());

    let history = match options.device {
        DeviceKind::Cpu => run::<Autodiff<NdArray>>(
            comms,
            &config,
            dataset,
            &options.artifact_dir,
            |_| NdArrayDevice::Cpu,
        )?,
        DeviceKind::Gpu => run_gpu(comms, &config, dataset, &options.artifact_dir)?,
    };

    config.save(options.artifact_dir.join("config.json"))?;
    let writer = BufWriter::new(File::create(options.artifact_dir.join("metrics.json"))?);
    serde_json::to_writer_pretty(writer, &history)?;

    let elapsed = started.elapsed();
    println!("Total training time: {} seconds", elapsed.as_secs_f64());

    Ok(TrainingReport {
        workers,
        history,
        elapsed,
    })
}

fn load_dataset(source: &DataSource, seed: u64) -> Result<CifarDataset, TrainingError> {
    match source {
        DataSource::Cifar10(dir) => {
            log::info!("Loading CIFAR-10 from {}", dir.display());
            Ok(CifarDataset::train(dir)?)
        }
        DataSource::Synthetic { num_items } => {
            log::info!("Generating {num_items} synthetic images");
            Ok(CifarDataset::synthetic(*num_items, seed))
        }
    }
}

#[cfg(feature = "wgpu")]
fn run_gpu(
    comms: Vec<Arc<dyn Communicator>>,
    config: &TrainingConfig,
    dataset: Arc<CifarDataset>,
    artifact_dir: &Path,
) -> Result<Vec<EpochMetrics>, TrainingError> {
    use burn::backend::wgpu::{Wgpu, WgpuDevice};

    run::<Autodiff<Wgpu>>(comms, config, dataset, artifact_dir, |local_rank| {
        WgpuDevice::DiscreteGpu(local_rank)
    })
}

#[cfg(not(feature = "wgpu"))]
fn run_gpu(
    _comms: Vec<Arc<dyn Communicator>>,
    _config: &TrainingConfig,
    _dataset: Arc<CifarDataset>,
    _artifact_dir: &Path,
) -> Result<Vec<EpochMetrics>, TrainingError> {
    Err(TrainingError::DeviceUnavailable(DeviceKind::Gpu))
}

/// Runs every worker to completion and returns the history of rank 0.
fn run<B: AutodiffBackend>(
    comms: Vec<Arc<dyn Communicator>>,
    config: &TrainingConfig,
    dataset: Arc<CifarDataset>,
    artifact_dir: &Path,
    device_for: impl Fn(usize) -> B::Device,
) -> Result<Vec<EpochMetrics>, TrainingError> {
    B::seed(config.seed);

    let results: Vec<Result<WorkerOutcome, TrainingError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let rank = comm.rank();
                let device = device_for(comm.local_rank());
                let dataset = dataset.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("worker-{rank}"))
                    .spawn_scoped(scope, move || {
                        train_worker::<B>(comm, config, dataset, device, artifact_dir)
                    });
                (rank, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(rank, handle)| match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or(Err(TrainingError::WorkerPanicked(rank))),
                Err(err) => Err(TrainingError::Io(err)),
            })
            .collect()
    });

    let mut history = None;
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(outcome) if outcome.rank == 0 => history = Some(outcome.history),
            Ok(_) => {}
            Err(err) => {
                log::error!("{err}");
                errors.push(err);
            }
        }
    }

    match root_cause(errors) {
        Some(err) => Err(err),
        None => Ok(history.unwrap_or_default()),
    }
}

/// First error other than a departed peer, or the first error when every worker
/// reports one.
fn root_cause(errors: Vec<TrainingError>) -> Option<TrainingError> {
    let position = errors
        .iter()
        .position(|err| !err.is_peer_left())
        .unwrap_or_default();
    errors.into_iter().nth(position)
}
