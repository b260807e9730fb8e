use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use super::{CifarItem, IMAGE_SIZE, NUM_CHANNELS};

#[derive(Clone, Debug, derive_new::new)]
pub struct CifarBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Clone, Debug)]
pub struct CifarBatch<B: Backend> {
    /// `[batch_size, 3, 32, 32]`, scaled to `[0, 1]`.
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<CifarItem, CifarBatch<B>> for CifarBatcher<B> {
    fn batch(&self, items: Vec<CifarItem>) -> CifarBatch<B> {
        let batch_size = items.len();

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().map(|pixel| *pixel as f32 / 255.0))
            .collect();
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();

        let images = TensorData::new(pixels, [batch_size, NUM_CHANNELS, IMAGE_SIZE, IMAGE_SIZE])
            .convert::<B::FloatElem>();
        let targets = TensorData::new(labels, [batch_size]).convert::<B::IntElem>();

        CifarBatch {
            images: Tensor::from_data(images, &self.device),
            targets: Tensor::from_data(targets, &self.device),
        }
    }
}
