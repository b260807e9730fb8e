//! Data-parallel training of a small convolutional network on CIFAR-10.
//!
//! Every worker runs on its own thread with its own copy of the model. The initial
//! parameters are broadcast from rank 0, gradients are averaged before each step and
//! the learning rate, scaled by the number of workers, is warmed up over the first
//! epochs. Only rank 0 prints progress and writes checkpoints.

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod data;
pub mod device;
mod error;
pub mod launcher;
pub mod model;
pub mod schedule;
pub mod summary;
pub mod training;

pub use config::TrainingConfig;
pub use error::TrainingError;
