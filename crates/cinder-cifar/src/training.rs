use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use burn::data::dataloader::{
    BatchDataLoader, DataLoader, DataLoaderBuilder, DynDataLoader, FixBatchStrategy,
    MultiThreadDataLoader,
};
use burn::data::dataset::transform::{PartialDataset, ShuffledDataset};
use burn::data::dataset::Dataset;
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use cinder_collective::{average_metrics, broadcast_module, Communicator, DistributedOptimizer};
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpointer;
use crate::data::{CifarBatch, CifarBatcher, CifarDataset, CifarItem};
use crate::model::CifarCnn;
use crate::schedule::LearningRateWarmup;
use crate::{TrainingConfig, TrainingError};

const LOSS: &str = "loss";
const ACCURACY: &str = "accuracy";

type EpochItems = PartialDataset<ShuffledDataset<Arc<CifarDataset>, CifarItem>, CifarItem>;

/// Metrics of one epoch, averaged over every worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Counted from one.
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    /// Learning rate of the last step.
    pub learning_rate: f64,
}

/// What a worker hands back once training is over.
#[derive(Clone, Debug)]
pub struct WorkerOutcome {
    pub rank: usize,
    pub history: Vec<EpochMetrics>,
}

/// Number of steps each worker runs per epoch so that one epoch over all the
/// workers sees the dataset about once.
pub fn steps_per_epoch(nsamples: usize, workers: usize, batch_size: usize) -> usize {
    if workers == 0 || batch_size == 0 {
        return 0;
    }
    nsamples / workers / batch_size
}

/// Trains the model on the calling thread as the worker `comm.rank()`.
///
/// Every worker of the group must call it with the same configuration.
pub fn train_worker<B: AutodiffBackend>(
    comm: Arc<dyn Communicator>,
    config: &TrainingConfig,
    dataset: Arc<CifarDataset>,
    device: B::Device,
    artifact_dir: &Path,
) -> Result<WorkerOutcome, TrainingError> {
    let rank = comm.rank();
    let size = comm.size();
    println!("I am rank {rank} of {size}");

    let steps = steps_per_epoch(dataset.len(), size, config.batch_size);
    if steps == 0 {
        return Err(TrainingError::EmptyEpoch {
            nsamples: dataset.len(),
            workers: size,
            batch_size: config.batch_size,
        });
    }

    let model = config.model.init::<B>(&device);
    let mut model = broadcast_module::<B, _>(comm.as_ref(), model, 0)?;
    if comm.is_root() {
        println!("{}", model.summary());
    }

    let mut optimizer =
        DistributedOptimizer::new(config.optimizer.init::<B, CifarCnn<B>>(), comm.clone());
    let warmup = LearningRateWarmup::new(
        config.learning_rate * size as f64,
        size,
        config.warmup_epochs,
        steps,
    );
    let checkpointer = Checkpointer::for_rank(rank, artifact_dir);
    let mut history = Vec::with_capacity(config.num_epochs);

    for epoch in 0..config.num_epochs {
        let items = epoch_items(&dataset, config, rank, size, epoch, steps);
        let loader = epoch_loader(
            CifarBatcher::<B>::new(device.clone()),
            items,
            config.batch_size,
            config.num_inter,
        );

        let mut loss_sum = 0.0;
        let mut accuracy_sum = 0.0;
        let mut num_steps = 0;
        let mut learning_rate = warmup.initial_lr();

        for (step, batch) in loader.iter().enumerate() {
            learning_rate = warmup.learning_rate(epoch, step);

            let output = model.forward_classification(batch);
            let loss = output.loss.clone().into_scalar().elem::<f64>();
            let accuracy = accuracy(output.output, output.targets);

            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads)?;

            log::debug!(
                "[rank {rank}] epoch {} step {}/{steps}: loss {loss:.4}, accuracy {accuracy:.4}, lr {learning_rate:.6}",
                epoch + 1,
                step + 1,
            );
            loss_sum += loss;
            accuracy_sum += accuracy;
            num_steps += 1;
        }

        let local = BTreeMap::from([
            (LOSS.to_string(), loss_sum / num_steps.max(1) as f64),
            (ACCURACY.to_string(), accuracy_sum / num_steps.max(1) as f64),
        ]);
        let averaged = average_metrics(comm.as_ref(), &local)?;
        let metrics = EpochMetrics {
            epoch: epoch + 1,
            loss: averaged.get(LOSS).copied().unwrap_or_default(),
            accuracy: averaged.get(ACCURACY).copied().unwrap_or_default(),
            learning_rate,
        };

        if comm.is_root() {
            println!(
                "Epoch {}/{} - {num_steps} steps - loss: {:.4} - accuracy: {:.4} - lr: {:.6}",
                metrics.epoch, config.num_epochs, metrics.loss, metrics.accuracy, learning_rate
            );
            if warmup.finishes_at(epoch) {
                println!(
                    "Epoch {}: finished gradual learning rate warmup to {}.",
                    metrics.epoch,
                    warmup.initial_lr()
                );
            }
        }

        if let Some(checkpointer) = &checkpointer {
            checkpointer.save(model.clone(), metrics.epoch)?;
        }
        history.push(metrics);
    }

    log::info!("Worker {rank} finished {} epochs", history.len());
    Ok(WorkerOutcome { rank, history })
}

/// The `steps * batch_size` items a worker sees during `epoch`.
///
/// Each worker draws from its own permutation of the dataset, reshuffled every epoch.
fn epoch_items(
    dataset: &Arc<CifarDataset>,
    config: &TrainingConfig,
    rank: usize,
    size: usize,
    epoch: usize,
    steps: usize,
) -> EpochItems {
    let seed = config
        .seed
        .wrapping_add((epoch * size + rank) as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let shuffled = ShuffledDataset::with_seed(dataset.clone(), seed);
    PartialDataset::new(shuffled, 0, steps * config.batch_size)
}

/// Batches `items`, a whole number of `batch_size` batches, on up to `num_threads`
/// loader threads.
///
/// Every thread receives whole batches so that the loader yields exactly
/// `items.len() / batch_size` full batches.
fn epoch_loader<B: Backend>(
    batcher: CifarBatcher<B>,
    items: EpochItems,
    batch_size: usize,
    num_threads: usize,
) -> Arc<dyn DataLoader<CifarBatch<B>>> {
    let num_batches = items.len() / batch_size.max(1);
    let num_threads = num_threads.min(num_batches);
    if num_threads <= 1 {
        return DataLoaderBuilder::new(batcher)
            .batch_size(batch_size)
            .build(items);
    }

    let items = Arc::new(items);
    let mut start = 0;
    let loaders = (0..num_threads)
        .map(|thread| {
            let share =
                num_batches / num_threads + usize::from(thread < num_batches % num_threads);
            let end = start + share * batch_size;
            let split = PartialDataset::new(items.clone(), start, end);
            start = end;

            let loader = BatchDataLoader::<CifarItem, CifarBatch<B>>::new(
                Box::new(FixBatchStrategy::new(batch_size)),
                Arc::new(split),
                Box::new(batcher.clone()),
                None,
            );
            Box::new(loader) as Box<dyn DynDataLoader<CifarBatch<B>>>
        })
        .collect();

    Arc::new(MultiThreadDataLoader::new(loaders))
}

/// Fraction of the targets predicted correctly.
fn accuracy<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let num_predictions = targets.dims()[0];
    let predictions = output.argmax(1).squeeze::<1>(1);
    let num_corrects = predictions.equal(targets).int().sum().into_scalar();

    num_corrects.elem::<f64>() / num_predictions.max(1) as f64
}
