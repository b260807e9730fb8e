use crate::Operation;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CollectiveError {
    #[error("A worker group needs at least one worker, got {0}")]
    InvalidWorldSize(usize),
    #[error("Root rank {root} is out of range for a group of {size} workers")]
    InvalidRoot { root: usize, size: usize },
    #[error("Worker {rank} left the group")]
    PeerLeft { rank: usize },
    #[error("Worker {rank} issued {found} while the group expected {expected}")]
    OperationMismatch {
        rank: usize,
        expected: Operation,
        found: Operation,
    },
    #[error("Worker {rank} contributed {found} values while the group expected {expected}")]
    LengthMismatch {
        rank: usize,
        expected: usize,
        found: usize,
    },
}
