mod batcher;
mod dataset;

pub use batcher::*;
pub use dataset::*;
