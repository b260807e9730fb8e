use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;

use crate::TrainingError;

/// Extension added by [NamedMpkFileRecorder].
const CHECKPOINT_EXTENSION: &str = "mpk";

/// Saves the model at the end of every epoch.
///
/// Only rank 0 gets a checkpointer, so that workers never write the same file.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    directory: PathBuf,
    recorder: NamedMpkFileRecorder<FullPrecisionSettings>,
}

impl Checkpointer {
    pub fn for_rank<P: AsRef<Path>>(rank: usize, directory: P) -> Option<Self> {
        (rank == 0).then(|| Self {
            directory: directory.as_ref().to_path_buf(),
            recorder: NamedMpkFileRecorder::new(),
        })
    }

    /// File written for `epoch`, counted from one.
    pub fn path(&self, epoch: usize) -> PathBuf {
        self.stem(epoch).with_extension(CHECKPOINT_EXTENSION)
    }

    pub fn save<B: Backend, M: Module<B>>(
        &self,
        module: M,
        epoch: usize,
    ) -> Result<PathBuf, TrainingError> {
        let path = self.path(epoch);
        module
            .save_file(self.stem(epoch), &self.recorder)
            .map_err(|err| TrainingError::Checkpoint {
                path: path.display().to_string(),
                reason: format!("{err:?}"),
            })?;

        log::debug!("Saved checkpoint {}", path.display());
        Ok(path)
    }

    fn stem(&self, epoch: usize) -> PathBuf {
        self.directory.join(format!("checkpoint-{epoch}"))
    }
}
