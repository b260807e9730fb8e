use std::path::PathBuf;

use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;
use burn::tensor::Distribution;
use cinder_profiler::{Profiler, ProfilerConfig, ProfilerError, SortKey};

use crate::model::ResNetConfig;

/// Double precision with gradient tracking, so that batch normalization runs on
/// batch statistics as in training mode.
pub type ProfileBackend = Autodiff<NdArray<f64>>;

/// What to profile and how to print it.
#[derive(Clone, Debug)]
pub struct ProfileOptions {
    pub batch_size: usize,
    pub image_size: usize,
    pub sort_by: SortKey,
    /// Rows of the table, `0` for all of them.
    pub row_limit: usize,
    pub group_by_input_shape: bool,
    /// Also writes the events as a Chrome trace.
    pub trace: Option<PathBuf>,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            batch_size: 128,
            image_size: 224,
            sort_by: SortKey::SelfCpuMemoryUsage,
            row_limit: 10,
            group_by_input_shape: false,
            trace: None,
        }
    }
}

/// Profiles one forward pass of a ResNet-18 on random images and returns the
/// summary table.
pub fn profile_forward<B: Backend>(
    model: ResNetConfig,
    options: &ProfileOptions,
    device: &B::Device,
) -> Result<String, ProfilerError> {
    let model = model.init::<B>(device);
    let inputs = Tensor::<B, 4>::random(
        [options.batch_size, 3, options.image_size, options.image_size],
        Distribution::Normal(0.0, 1.0),
        device,
    );
    log::info!("Profiling a forward pass on inputs of shape {:?}", inputs.dims());

    let session = Profiler::start(
        ProfilerConfig::new()
            .with_profile_memory(true)
            .with_record_shapes(true),
    )?;
    let output = model.forward(inputs);
    let report = session.finish();
    log::debug!("Output of shape {:?}", output.dims());

    if let Some(path) = &options.trace {
        report.export_chrome_trace(path)?;
    }

    let averages = report.key_averages(options.group_by_input_shape);
    Ok(averages.table(options.sort_by, options.row_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::nn::BatchNormConfig;

    type TestBackend = ProfileBackend;

    fn small_options() -> ProfileOptions {
        ProfileOptions {
            batch_size: 2,
            image_size: 32,
            ..Default::default()
        }
    }

    #[test]
    fn forward_pass_yields_a_table() {
        let table = profile_forward::<TestBackend>(
            ResNetConfig::resnet18(10),
            &small_options(),
            &Default::default(),
        )
        .unwrap();

        assert!(table.contains("Self CPU Mem"));
        assert!(table.contains("conv2d"));
        assert!(table.contains("Self CPU time total:"));
        // Header, separators and footer around at most ten rows.
        assert!(table.lines().count() <= 10 + 5);
    }

    #[test]
    fn grouping_by_shape_and_trace_export() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace.json");
        let options = ProfileOptions {
            group_by_input_shape: true,
            row_limit: 0,
            trace: Some(trace.clone()),
            ..small_options()
        };

        let table = profile_forward::<TestBackend>(
            ResNetConfig::resnet18(10),
            &options,
            &Default::default(),
        )
        .unwrap();

        assert!(table.contains("Input Shapes"));
        assert!(table.contains("[[2, 3, 32, 32]]"));
        assert!(trace.is_file());
    }

    #[test]
    fn batch_norm_normalizes_with_batch_statistics() {
        let device = Default::default();
        let norm = BatchNormConfig::new(3).init::<TestBackend, 2>(&device);
        let input =
            Tensor::<TestBackend, 4>::random([4, 3, 8, 8], Distribution::Normal(0.0, 1.0), &device)
                .mul_scalar(5.0)
                .add_scalar(3.0);

        let mean = norm.forward(input).mean().into_scalar();

        assert!(mean.abs() < 1e-6, "mean {mean}");
    }
}
