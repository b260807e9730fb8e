use std::fmt;

use crate::CollectiveError;

/// How contributions from every rank are combined by [Communicator::all_reduce].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
}

impl ReduceOp {
    /// Combines the per-rank buffers, in rank order, into a single buffer.
    ///
    /// All buffers must have the same length; this is checked by the caller.
    pub fn reduce(self, contributions: &[Vec<f32>]) -> Vec<f32> {
        let Some((first, rest)) = contributions.split_first() else {
            return Vec::new();
        };

        let mut acc = first.clone();
        for values in rest {
            for (acc, value) in acc.iter_mut().zip(values) {
                *acc = match self {
                    ReduceOp::Sum | ReduceOp::Mean => *acc + value,
                    ReduceOp::Max => acc.max(*value),
                    ReduceOp::Min => acc.min(*value),
                };
            }
        }

        if self == ReduceOp::Mean {
            let count = contributions.len() as f32;
            acc.iter_mut().for_each(|value| *value /= count);
        }

        acc
    }
}

/// A collective call, as issued by one rank.
///
/// Every rank of a group must issue the same sequence of operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    AllReduce(ReduceOp),
    Broadcast { root: usize },
    Barrier,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::AllReduce(op) => write!(f, "all_reduce({op})"),
            Operation::Broadcast { root } => write!(f, "broadcast(root={root})"),
            Operation::Barrier => f.write_str("barrier"),
        }
    }
}

/// The handle a worker uses to take part in collective operations.
pub trait Communicator: Send + Sync {
    /// The identifier of this worker within the group, in `0..size`.
    fn rank(&self) -> usize;

    /// The number of workers in the group.
    fn size(&self) -> usize;

    /// The rank of this worker among the workers sharing its host.
    ///
    /// Used to pin a worker to a device.
    fn local_rank(&self) -> usize {
        self.rank()
    }

    /// Combines `values` from every rank and returns the result to all of them.
    fn all_reduce(&self, values: Vec<f32>, op: ReduceOp) -> Result<Vec<f32>, CollectiveError>;

    /// Returns the values contributed by `root` to every rank.
    fn broadcast(&self, values: Vec<f32>, root: usize) -> Result<Vec<f32>, CollectiveError>;

    /// Blocks until every rank reached the barrier.
    fn barrier(&self) -> Result<(), CollectiveError>;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// The communicator of a single worker running on its own.
///
/// Every collective is the identity, so code written for a group runs sequentially
/// without change.
#[derive(Clone, Copy, Debug, Default)]
pub struct Standalone;

impl Communicator for Standalone {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce(&self, values: Vec<f32>, _op: ReduceOp) -> Result<Vec<f32>, CollectiveError> {
        Ok(values)
    }

    fn broadcast(&self, values: Vec<f32>, root: usize) -> Result<Vec<f32>, CollectiveError> {
        if root != 0 {
            return Err(CollectiveError::InvalidRoot { root, size: 1 });
        }
        Ok(values)
    }

    fn barrier(&self) -> Result<(), CollectiveError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ReduceOp::Sum, vec![9.0, -3.0])]
    #[case(ReduceOp::Mean, vec![3.0, -1.0])]
    #[case(ReduceOp::Max, vec![5.0, 2.0])]
    #[case(ReduceOp::Min, vec![1.0, -4.0])]
    fn reduce_combines_every_rank(#[case] op: ReduceOp, #[case] expected: Vec<f32>) {
        let contributions = vec![vec![1.0, 2.0], vec![3.0, -1.0], vec![5.0, -4.0]];

        assert_eq!(op.reduce(&contributions), expected);
    }

    #[test]
    fn reduce_op_parses_from_snake_case() {
        assert_eq!("mean".parse::<ReduceOp>().unwrap(), ReduceOp::Mean);
        assert_eq!(ReduceOp::Max.to_string(), "max");
    }

    #[test]
    fn standalone_reports_single_worker() {
        let comm = Standalone;

        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.local_rank(), 0);
        assert!(comm.is_root());
    }

    #[test]
    fn standalone_collectives_are_identity() {
        let comm = Standalone;

        assert_eq!(
            comm.all_reduce(vec![1.5, 2.5], ReduceOp::Mean).unwrap(),
            vec![1.5, 2.5]
        );
        assert_eq!(comm.broadcast(vec![4.0], 0).unwrap(), vec![4.0]);
        assert!(comm.barrier().is_ok());
    }

    #[test]
    fn standalone_rejects_foreign_root() {
        assert_eq!(
            Standalone.broadcast(vec![4.0], 1),
            Err(CollectiveError::InvalidRoot { root: 1, size: 1 })
        );
    }
}
