use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const IMAGE_SIZE: usize = 32;
pub const NUM_CHANNELS: usize = 3;
pub const NUM_CLASSES: usize = 10;
/// Pixels of one image, stored channel by channel.
pub const IMAGE_BYTES: usize = NUM_CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
/// One label byte followed by the image.
pub const RECORD_BYTES: usize = IMAGE_BYTES + 1;

const BATCHES_DIR: &str = "cifar-10-batches-bin";
const TRAIN_BATCHES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_BATCH: &str = "test_batch.bin";

#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is not a CIFAR-10 binary batch ({len} bytes)", path.display())]
    Malformed { path: PathBuf, len: usize },
    #[error("Record {index} of {} has label {label}, expected less than 10", path.display())]
    InvalidLabel {
        path: PathBuf,
        index: usize,
        label: u8,
    },
}

/// A CIFAR-10 image with its class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CifarItem {
    /// `3 x 32 x 32` pixels, red plane first.
    pub image: Vec<u8>,
    pub label: u8,
}

/// CIFAR-10 images held in memory.
#[derive(Clone, Debug, Default)]
pub struct CifarDataset {
    pixels: Vec<u8>,
    labels: Vec<u8>,
}

impl CifarDataset {
    /// Loads the 50 000 training images from the binary batches found in `dir`.
    ///
    /// `dir` may either hold the batches or the `cifar-10-batches-bin` directory
    /// of the extracted archive.
    pub fn train<P: AsRef<Path>>(dir: P) -> Result<Self, DatasetError> {
        let dir = Self::batches_dir(dir.as_ref());
        Self::from_files(TRAIN_BATCHES.iter().map(|name| dir.join(name)))
    }

    /// Loads the 10 000 test images from `dir`.
    pub fn test<P: AsRef<Path>>(dir: P) -> Result<Self, DatasetError> {
        let dir = Self::batches_dir(dir.as_ref());
        Self::from_files([dir.join(TEST_BATCH)])
    }

    pub fn from_files<I>(paths: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut dataset = Self::default();
        for path in paths {
            let bytes = std::fs::read(&path).map_err(|source| DatasetError::Read {
                path: path.clone(),
                source,
            })?;
            dataset.extend_from_records(&path, &bytes)?;
            log::debug!("Loaded {} ({} images so far)", path.display(), dataset.len());
        }
        Ok(dataset)
    }

    /// Parses records laid out as in the binary batches.
    pub fn from_records(bytes: &[u8]) -> Result<Self, DatasetError> {
        let mut dataset = Self::default();
        dataset.extend_from_records(Path::new("<memory>"), bytes)?;
        Ok(dataset)
    }

    /// Generates `num_items` random images whose brightness depends on their class,
    /// so that a model can learn something from them.
    pub fn synthetic(num_items: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut pixels = Vec::with_capacity(num_items * IMAGE_BYTES);
        let mut labels = Vec::with_capacity(num_items);

        for _ in 0..num_items {
            let label = rng.gen_range(0..NUM_CLASSES as u8);
            let base = label as i32 * 24;
            pixels.extend((0..IMAGE_BYTES).map(|_| (base + rng.gen_range(0..40)) as u8));
            labels.push(label);
        }

        Self { pixels, labels }
    }

    fn batches_dir(dir: &Path) -> PathBuf {
        let nested = dir.join(BATCHES_DIR);
        if nested.is_dir() {
            nested
        } else {
            dir.to_path_buf()
        }
    }

    fn extend_from_records(&mut self, path: &Path, bytes: &[u8]) -> Result<(), DatasetError> {
        if bytes.is_empty() || bytes.len() % RECORD_BYTES != 0 {
            return Err(DatasetError::Malformed {
                path: path.to_path_buf(),
                len: bytes.len(),
            });
        }

        self.pixels.reserve(bytes.len() / RECORD_BYTES * IMAGE_BYTES);
        for (index, record) in bytes.chunks_exact(RECORD_BYTES).enumerate() {
            let label = record[0];
            if label as usize >= NUM_CLASSES {
                return Err(DatasetError::InvalidLabel {
                    path: path.to_path_buf(),
                    index,
                    label,
                });
            }
            self.labels.push(label);
            self.pixels.extend_from_slice(&record[1..]);
        }
        Ok(())
    }
}

impl Dataset<CifarItem> for CifarDataset {
    fn get(&self, index: usize) -> Option<CifarItem> {
        let label = *self.labels.get(index)?;
        let start = index * IMAGE_BYTES;
        let image = self.pixels.get(start..start + IMAGE_BYTES)?.to_vec();
        Some(CifarItem { image, label })
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}
