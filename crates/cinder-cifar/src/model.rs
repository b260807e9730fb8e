use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::train::ClassificationOutput;

use crate::data::{CifarBatch, IMAGE_SIZE, NUM_CHANNELS, NUM_CLASSES};
use crate::summary::{LayerSummary, ModelSummary};

const KERNEL_SIZE: usize = 3;
const POOL_SIZE: usize = 2;

#[derive(Config, Debug)]
pub struct CifarCnnConfig {
    #[config(default = "NUM_CLASSES")]
    pub num_classes: usize,
    #[config(default = "[32, 64, 128]")]
    pub channels: [usize; 3],
    #[config(default = "[256, 128]")]
    pub hidden_sizes: [usize; 2],
}

/// Three convolution blocks followed by a three layer perceptron.
///
/// Every convolution block is a `3x3` convolution without padding, a ReLU and a
/// `2x2` max pooling.
#[derive(Module, Debug)]
pub struct CifarCnn<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: MaxPool2d,
    dense1: Linear<B>,
    dense2: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl CifarCnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CifarCnn<B> {
        let [c1, c2, c3] = self.channels;
        let [h1, h2] = self.hidden_sizes;
        let kernel = [KERNEL_SIZE, KERNEL_SIZE];
        let side = self.feature_map_side(3);

        CifarCnn {
            conv1: Conv2dConfig::new([NUM_CHANNELS, c1], kernel).init(device),
            conv2: Conv2dConfig::new([c1, c2], kernel).init(device),
            conv3: Conv2dConfig::new([c2, c3], kernel).init(device),
            pool: MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init(),
            dense1: LinearConfig::new(c3 * side * side, h1).init(device),
            dense2: LinearConfig::new(h1, h2).init(device),
            output: LinearConfig::new(h2, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }

    /// Side of the feature maps after `blocks` convolution blocks.
    fn feature_map_side(&self, blocks: usize) -> usize {
        (0..blocks).fold(IMAGE_SIZE, |side, _| (side - (KERNEL_SIZE - 1)) / POOL_SIZE)
    }
}

impl<B: Backend> CifarCnn<B> {
    /// Returns the logits, `[batch_size, num_classes]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.block(&self.conv1, images);
        let x = self.block(&self.conv2, x);
        let x = self.block(&self.conv3, x);

        let x = x.flatten::<2>(1, 3);
        let x = self.activation.forward(self.dense1.forward(x));
        let x = self.activation.forward(self.dense2.forward(x));
        self.output.forward(x)
    }

    /// Class probabilities, `[batch_size, num_classes]`.
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn forward_classification(&self, batch: CifarBatch<B>) -> ClassificationOutput<B> {
        let targets = batch.targets;
        let output = self.forward(batch.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput {
            loss,
            output,
            targets,
        }
    }

    pub fn summary(&self) -> ModelSummary {
        let mut layers = Vec::new();
        let mut side = IMAGE_SIZE;
        let mut channels = NUM_CHANNELS;

        for (index, conv) in [&self.conv1, &self.conv2, &self.conv3].into_iter().enumerate() {
            let suffix = layer_suffix(index);
            [channels, _, _, _] = conv.weight.val().dims();
            side -= KERNEL_SIZE - 1;
            layers.push(
                LayerSummary::new(format!("conv2d{suffix}"), "Conv2D", vec![channels, side, side])
                    .with_params(conv.num_params()),
            );

            side /= POOL_SIZE;
            layers.push(LayerSummary::new(
                format!("max_pooling2d{suffix}"),
                "MaxPooling2D",
                vec![channels, side, side],
            ));
        }

        layers.push(LayerSummary::new(
            "flatten",
            "Flatten",
            vec![channels * side * side],
        ));

        for (index, dense) in [&self.dense1, &self.dense2, &self.output].into_iter().enumerate() {
            let [_, d_output] = dense.weight.val().dims();
            layers.push(
                LayerSummary::new(format!("dense{}", layer_suffix(index)), "Dense", vec![d_output])
                    .with_params(dense.num_params()),
            );
        }

        ModelSummary {
            name: "sequential".to_string(),
            layers,
        }
    }

    fn block(&self, conv: &Conv2d<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(self.activation.forward(conv.forward(x)))
    }
}

/// Layers of the same kind are named `conv2d`, `conv2d_1`, `conv2d_2`...
fn layer_suffix(index: usize) -> String {
    match index {
        0 => String::new(),
        index => format!("_{index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn default_model_matches_the_reference_parameter_count() {
        let model = CifarCnnConfig::new().init::<TestBackend>(&Default::default());

        assert_eq!(model.num_params(), 258_762);
    }

    #[test]
    fn forward_returns_one_row_of_logits_per_image() {
        let device = Default::default();
        let model = CifarCnnConfig::new().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);

        let probabilities = model.probabilities(images);

        assert_eq!(probabilities.dims(), [2, 10]);
        let sums: Vec<f32> = probabilities.sum_dim(1).into_data().iter::<f32>().collect();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn summary_describes_every_layer() {
        let model = CifarCnnConfig::new().init::<TestBackend>(&Default::default());

        let summary = model.summary();

        assert_eq!(summary.layers.len(), 10);
        assert_eq!(summary.total_params(), model.num_params());
        assert_eq!(summary.layers[0].output_shape, vec![32, 30, 30]);
        assert_eq!(summary.layers[0].num_params, 896);
        assert_eq!(summary.layers[6].output_shape, vec![512]);
        assert_eq!(summary.layers[7].num_params, 131_328);
        assert_eq!(summary.layers[9].name, "dense_2");
    }
}
