/// Where the tensors of every worker live.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Gpu,
}

impl DeviceKind {
    pub fn is_available(&self) -> bool {
        match self {
            DeviceKind::Cpu => true,
            DeviceKind::Gpu => cfg!(feature = "wgpu"),
        }
    }
}

/// Sizes the global pool running the CPU tensor kernels.
///
/// `0` keeps the runtime default. The pool can only be sized once per process;
/// later calls keep the existing pool.
pub fn configure_intra_op_threads(num_threads: usize) {
    if num_threads == 0 {
        log::debug!(
            "Using the default number of intra-op threads ({})",
            rayon::current_num_threads()
        );
        return;
    }

    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|index| format!("intra-op-{index}"))
        .build_global()
    {
        Ok(()) => log::info!("Using {num_threads} intra-op threads"),
        Err(err) => log::warn!(
            "Keeping {} intra-op threads: {err}",
            rayon::current_num_threads()
        ),
    }
}
