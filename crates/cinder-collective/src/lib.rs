//! Collective operations for data-parallel training with Burn.
//!
//! A training run is made of `size` workers, each identified by its rank. Workers
//! talk to each other only through a [Communicator]: gradients are averaged before
//! every optimizer step, the initial parameters are broadcast from rank 0 and the
//! epoch metrics are averaged so that every rank reports the same numbers.

mod communicator;
mod error;
#[cfg(feature = "local-group")]
mod local;
mod metrics;
mod module;

pub use communicator::*;
pub use error::CollectiveError;
#[cfg(feature = "local-group")]
pub use local::{LocalGroup, LocalPeer};
pub use metrics::average_metrics;
pub use module::{average_gradients, broadcast_module, DistributedOptimizer};

use std::sync::Arc;

/// Returns true when this build can run more than one worker.
pub fn is_available() -> bool {
    cfg!(feature = "local-group")
}

/// Creates one communicator per worker of a group of `world_size` workers.
///
/// The returned vector is indexed by rank. When no collective backend was compiled
/// in, a single [Standalone] communicator is returned whatever the requested size.
pub fn init(world_size: usize) -> Result<Vec<Arc<dyn Communicator>>, CollectiveError> {
    if world_size == 0 {
        return Err(CollectiveError::InvalidWorldSize(world_size));
    }

    if !is_available() {
        println!("Could not find a collective backend, will do things sequentially");
        return Ok(vec![Arc::new(Standalone)]);
    }

    if world_size == 1 {
        log::debug!("Single worker requested, using the standalone communicator");
        return Ok(vec![Arc::new(Standalone)]);
    }

    Ok(group(world_size))
}

#[cfg(feature = "local-group")]
fn group(world_size: usize) -> Vec<Arc<dyn Communicator>> {
    log::info!("Creating a local group of {world_size} workers");
    LocalGroup::new(world_size)
        .into_peers()
        .into_iter()
        .map(|peer| Arc::new(peer) as Arc<dyn Communicator>)
        .collect()
}

#[cfg(not(feature = "local-group"))]
fn group(_world_size: usize) -> Vec<Arc<dyn Communicator>> {
    vec![Arc::new(Standalone)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_rejects_empty_group() {
        assert!(matches!(
            init(0),
            Err(CollectiveError::InvalidWorldSize(0))
        ));
    }

    #[test]
    fn init_single_worker_is_standalone() {
        let comms = init(1).unwrap();

        assert_eq!(comms.len(), 1);
        assert_eq!(comms[0].rank(), 0);
        assert_eq!(comms[0].size(), 1);
    }

    #[cfg(feature = "local-group")]
    #[test]
    fn init_assigns_ranks_in_order() {
        let comms = init(3).unwrap();

        let ranks: Vec<_> = comms.iter().map(|comm| comm.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(comms.iter().all(|comm| comm.size() == 3));
    }

    #[cfg(not(feature = "local-group"))]
    #[test]
    fn init_falls_back_to_sequential() {
        let comms = init(4).unwrap();

        assert_eq!(comms.len(), 1);
        assert_eq!(comms[0].rank(), 0);
        assert_eq!(comms[0].size(), 1);
    }
}
