use std::path::PathBuf;

use clap::Parser;
use cinder_profiler::SortKey;

use crate::profile::ProfileOptions;

/// Profiles the CPU time and memory of one ResNet-18 forward pass.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct ProfileArgs {
    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,
    /// Height and width of the random input images.
    #[arg(long, default_value_t = 224)]
    pub image_size: usize,
    /// Column the table is sorted by, in decreasing order.
    #[arg(long, default_value_t = SortKey::SelfCpuMemoryUsage)]
    pub sort_by: SortKey,
    /// Rows of the table, 0 for all of them.
    #[arg(long, default_value_t = 10)]
    pub row_limit: usize,
    /// One row per operation and input shapes instead of per operation.
    #[arg(long)]
    pub group_by_input_shape: bool,
    /// Writes a Chrome trace of the forward pass to this file.
    #[arg(long, value_name = "PATH")]
    pub trace: Option<PathBuf>,
}

impl From<ProfileArgs> for ProfileOptions {
    fn from(args: ProfileArgs) -> Self {
        Self {
            batch_size: args.batch_size,
            image_size: args.image_size,
            sort_by: args.sort_by,
            row_limit: args.row_limit,
            group_by_input_shape: args.group_by_input_shape,
            trace: args.trace,
        }
    }
}
