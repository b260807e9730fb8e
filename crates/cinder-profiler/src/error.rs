#[derive(thiserror::Error, Debug)]
pub enum ProfilerError {
    #[error("A profiling session is already active on this thread")]
    AlreadyActive,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize the trace: {0}")]
    Serialize(#[from] serde_json::Error),
}
