use burn::backend::ndarray::NdArrayDevice;
use cinder_profiler::TrackingAllocator;
use cinder_resnet::cli::ProfileArgs;
use cinder_resnet::{profile_forward, ProfileBackend, ProfileOptions, ResNetConfig};
use clap::Parser;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator::new();

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options: ProfileOptions = ProfileArgs::parse().into();
    let table = profile_forward::<ProfileBackend>(
        ResNetConfig::resnet18(1000),
        &options,
        &NdArrayDevice::Cpu,
    )?;
    println!("{table}");
    Ok(())
}
