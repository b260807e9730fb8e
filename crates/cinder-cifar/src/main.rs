use cinder_cifar::cli::TrainArgs;
use cinder_cifar::launcher;
use clap::Parser;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = TrainArgs::parse();
    log::debug!("{args:?}");

    launcher::launch(args.config(), args.launch_options())?;
    Ok(())
}
