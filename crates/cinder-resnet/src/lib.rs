//! Profiling of a ResNet-18 forward pass.
//!
//! Every operation of the model runs inside a profiled scope, so that a session
//! collects the CPU time and the memory allocated by each of them.

pub mod cli;
pub mod model;
pub mod profile;

pub use model::{ResNet, ResNetConfig};
pub use profile::{profile_forward, ProfileBackend, ProfileOptions};

#[cfg(test)]
#[global_allocator]
static GLOBAL: cinder_profiler::TrackingAllocator = cinder_profiler::TrackingAllocator::new();
