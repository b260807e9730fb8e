/// Gradual learning rate warmup for large effective batch sizes.
///
/// Training with `size` workers starts at `initial_lr / size` and reaches
/// `initial_lr` linearly, step by step, over the first `warmup_epochs` epochs.
#[derive(Clone, Debug, PartialEq)]
pub struct LearningRateWarmup {
    initial_lr: f64,
    size: usize,
    warmup_epochs: usize,
    steps_per_epoch: usize,
}

impl LearningRateWarmup {
    pub fn new(initial_lr: f64, size: usize, warmup_epochs: usize, steps_per_epoch: usize) -> Self {
        Self {
            initial_lr,
            size: size.max(1),
            warmup_epochs,
            steps_per_epoch: steps_per_epoch.max(1),
        }
    }

    /// Learning rate of the `step`-th step of `epoch`, both counted from zero.
    pub fn learning_rate(&self, epoch: usize, step: usize) -> f64 {
        let epoch = epoch as f64 + step as f64 / self.steps_per_epoch as f64;
        if epoch >= self.warmup_epochs as f64 {
            return self.initial_lr;
        }

        let epoch = epoch + 1.0 / self.steps_per_epoch as f64;
        let size = self.size as f64;
        self.initial_lr * (1.0 / size) * (epoch * (size - 1.0) / self.warmup_epochs as f64 + 1.0)
    }

    /// Whether the warmup completes at the end of `epoch`.
    pub fn finishes_at(&self, epoch: usize) -> bool {
        self.warmup_epochs > 0 && epoch + 1 == self.warmup_epochs
    }

    pub fn initial_lr(&self) -> f64 {
        self.initial_lr
    }
}
