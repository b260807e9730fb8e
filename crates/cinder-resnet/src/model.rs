use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::*;
use cinder_profiler::record_function_with_shapes;

/// Runs `op` on `input` inside a profiled scope named `name`.
fn profiled<B: Backend, const D: usize, const O: usize>(
    name: &'static str,
    input: Tensor<B, D>,
    op: impl FnOnce(Tensor<B, D>) -> Tensor<B, O>,
) -> Tensor<B, O> {
    let _scope = record_function_with_shapes(name, || vec![input.dims().to_vec()]);
    op(input)
}

#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Basic blocks in each of the four stages.
    #[config(default = "[2, 2, 2, 2]")]
    pub layers: [usize; 4],
    #[config(default = 1000)]
    pub num_classes: usize,
}

impl ResNetConfig {
    /// The 18 layer variant.
    pub fn resnet18(num_classes: usize) -> Self {
        Self::new().with_num_classes(num_classes)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let [l1, l2, l3, l4] = self.layers;

        ResNet {
            conv1: Conv2dConfig::new([3, 64], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: Stage::new(64, 64, l1, 1, device),
            layer2: Stage::new(64, 128, l2, 2, device),
            layer3: Stage::new(128, 256, l3, 2, device),
            layer4: Stage::new(256, 512, l4, 2, device),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(512, self.num_classes).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: Stage<B>,
    layer2: Stage<B>,
    layer3: Stage<B>,
    layer4: Stage<B>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
    /// Maps `[batch_size, 3, height, width]` images to `[batch_size, num_classes]` logits.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = profiled("conv2d", images, |x| self.conv1.forward(x));
        let x = profiled("batch_norm", x, |x| self.bn1.forward(x));
        let x = profiled("relu", x, |x| self.relu.forward(x));
        let x = profiled("max_pool2d", x, |x| self.maxpool.forward(x));

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        let x = profiled("adaptive_avg_pool2d", x, |x| self.avgpool.forward(x));
        let x = profiled("flatten", x, |x| x.flatten::<2>(1, 3));
        profiled("linear", x, |x| self.fc.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> Stage<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        num_blocks: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|index| match index {
                0 => BasicBlock::new(in_channels, out_channels, stride, device),
                _ => BasicBlock::new(out_channels, out_channels, 1, device),
            })
            .collect();

        Self { blocks }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// Two `3x3` convolutions with a residual connection.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1: conv3x3(in_channels, out_channels, stride, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            conv2: conv3x3(out_channels, out_channels, 1, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = profiled("conv2d", input, |x| self.conv1.forward(x));
        let x = profiled("batch_norm", x, |x| self.bn1.forward(x));
        let x = profiled("relu", x, |x| self.relu.forward(x));
        let x = profiled("conv2d", x, |x| self.conv2.forward(x));
        let x = profiled("batch_norm", x, |x| self.bn2.forward(x));

        let x = profiled("add", x, |x| x + identity);
        profiled("relu", x, |x| self.relu.forward(x))
    }
}

/// Matches the shape of the residual when a block changes the resolution or width.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = profiled("conv2d", x, |x| self.conv.forward(x));
        profiled("batch_norm", x, |x| self.bn.forward(x))
    }
}

fn conv3x3<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f64>;

    #[test]
    fn blocks_downsample_when_the_shape_changes() {
        let model = ResNetConfig::resnet18(1000).init::<TestBackend>(&Default::default());

        let stages = [&model.layer1, &model.layer2, &model.layer3, &model.layer4];
        assert!(stages.iter().all(|stage| stage.blocks.len() == 2));
        assert!(model.layer1.blocks[0].downsample.is_none());
        for stage in &stages[1..] {
            assert!(stage.blocks[0].downsample.is_some());
            assert!(stage.blocks[1].downsample.is_none());
        }
    }

    #[test]
    fn forward_maps_images_to_logits() {
        let device = Default::default();
        let model = ResNetConfig::new()
            .with_layers([1, 1, 1, 1])
            .with_num_classes(7)
            .init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);

        let logits = model.forward(images);

        assert_eq!(logits.dims(), [2, 7]);
    }
}
