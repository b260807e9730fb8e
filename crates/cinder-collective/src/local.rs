use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::{CollectiveError, Communicator, Operation, ReduceOp};

type Reply = Result<Arc<Vec<f32>>, CollectiveError>;

#[derive(Debug)]
struct Contribution {
    operation: Operation,
    values: Vec<f32>,
}

/// A group of workers living in the same process.
///
/// Rank 0 coordinates every collective: the other ranks send their contribution
/// to it, it reduces them in rank order and sends the result back. The result is
/// therefore bit-identical on every rank and from one run to the next.
pub struct LocalGroup {
    peers: Vec<LocalPeer>,
}

impl LocalGroup {
    /// Creates a group of `size` peers.
    ///
    /// # Panics
    ///
    /// If `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "A local group needs at least one worker");

        let mut inbound = Vec::with_capacity(size - 1);
        let mut outbound = Vec::with_capacity(size - 1);
        let mut members = Vec::with_capacity(size - 1);

        for rank in 1..size {
            let (to_root, from_member) = unbounded();
            let (to_member, from_root) = unbounded();
            inbound.push(from_member);
            outbound.push(to_member);
            members.push(LocalPeer {
                rank,
                size,
                link: Link::Member { to_root, from_root },
            });
        }

        let root = LocalPeer {
            rank: 0,
            size,
            link: Link::Root { inbound, outbound },
        };

        let mut peers = Vec::with_capacity(size);
        peers.push(root);
        peers.extend(members);

        Self { peers }
    }

    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// The peers of the group, indexed by rank.
    pub fn into_peers(self) -> Vec<LocalPeer> {
        self.peers
    }
}

enum Link {
    Root {
        inbound: Vec<Receiver<Contribution>>,
        outbound: Vec<Sender<Reply>>,
    },
    Member {
        to_root: Sender<Contribution>,
        from_root: Receiver<Reply>,
    },
}

/// One worker of a [LocalGroup].
///
/// Dropping a peer makes every collective still pending on the other peers fail
/// with [CollectiveError::PeerLeft].
pub struct LocalPeer {
    rank: usize,
    size: usize,
    link: Link,
}

impl LocalPeer {
    fn exchange(&self, operation: Operation, values: Vec<f32>) -> Result<Vec<f32>, CollectiveError> {
        match &self.link {
            Link::Root { inbound, outbound } => {
                let reply = self.coordinate(inbound, operation, values);
                for sender in outbound {
                    // A member that already left has nothing left to wait for.
                    let _ = sender.send(reply.clone());
                }
                reply.map(Arc::unwrap_or_clone)
            }
            Link::Member { to_root, from_root } => {
                to_root
                    .send(Contribution { operation, values })
                    .map_err(|_| CollectiveError::PeerLeft { rank: 0 })?;
                let reply = from_root
                    .recv()
                    .map_err(|_| CollectiveError::PeerLeft { rank: 0 })?;
                reply.map(Arc::unwrap_or_clone)
            }
        }
    }

    fn coordinate(
        &self,
        inbound: &[Receiver<Contribution>],
        operation: Operation,
        values: Vec<f32>,
    ) -> Reply {
        let mut contributions = Vec::with_capacity(self.size);
        contributions.push(values);

        // Every contribution of the round is drained, even after a failure, so that
        // no stale message is left behind for the next round.
        let mut failure = None;
        for (index, receiver) in inbound.iter().enumerate() {
            let rank = index + 1;
            match receiver.recv() {
                Ok(contribution) => {
                    if contribution.operation != operation && failure.is_none() {
                        failure = Some(CollectiveError::OperationMismatch {
                            rank,
                            expected: operation,
                            found: contribution.operation,
                        });
                    }
                    contributions.push(contribution.values);
                }
                Err(_) => {
                    failure.get_or_insert(CollectiveError::PeerLeft { rank });
                    contributions.push(Vec::new());
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        let result = match operation {
            Operation::AllReduce(op) => {
                let expected = contributions[0].len();
                if let Some((rank, values)) = contributions
                    .iter()
                    .enumerate()
                    .find(|(_, values)| values.len() != expected)
                {
                    return Err(CollectiveError::LengthMismatch {
                        rank,
                        expected,
                        found: values.len(),
                    });
                }
                op.reduce(&contributions)
            }
            Operation::Broadcast { root } => contributions.swap_remove(root),
            Operation::Barrier => Vec::new(),
        };

        Ok(Arc::new(result))
    }
}

impl Communicator for LocalPeer {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce(&self, values: Vec<f32>, op: ReduceOp) -> Result<Vec<f32>, CollectiveError> {
        self.exchange(Operation::AllReduce(op), values)
    }

    fn broadcast(&self, values: Vec<f32>, root: usize) -> Result<Vec<f32>, CollectiveError> {
        if root >= self.size {
            return Err(CollectiveError::InvalidRoot {
                root,
                size: self.size,
            });
        }
        self.exchange(Operation::Broadcast { root }, values)
    }

    fn barrier(&self) -> Result<(), CollectiveError> {
        self.exchange(Operation::Barrier, Vec::new()).map(|_| ())
    }
}
