use std::collections::BTreeMap;

use crate::{CollectiveError, Communicator, ReduceOp};

/// Averages named scalar metrics across the group.
///
/// Every rank must report the same metric names; they are exchanged in key order.
pub fn average_metrics(
    comm: &dyn Communicator,
    metrics: &BTreeMap<String, f64>,
) -> Result<BTreeMap<String, f64>, CollectiveError> {
    if comm.size() == 1 {
        return Ok(metrics.clone());
    }

    let values = metrics.values().map(|value| *value as f32).collect();
    let averaged = comm.all_reduce(values, ReduceOp::Mean)?;

    Ok(metrics
        .keys()
        .cloned()
        .zip(averaged.into_iter().map(f64::from))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Standalone;

    fn metrics(loss: f64, accuracy: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("accuracy".to_string(), accuracy),
            ("loss".to_string(), loss),
        ])
    }

    #[test]
    fn standalone_keeps_metrics() {
        let local = metrics(0.25, 0.5);

        assert_eq!(average_metrics(&Standalone, &local).unwrap(), local);
    }

    #[cfg(feature = "local-group")]
    #[test]
    fn metrics_are_averaged_on_every_rank() {
        use crate::LocalGroup;

        let peers = LocalGroup::new(2).into_peers();
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = peers
                .into_iter()
                .map(|peer| {
                    scope.spawn(move || {
                        let local = if peer.is_root() {
                            metrics(1.0, 0.25)
                        } else {
                            metrics(3.0, 0.75)
                        };
                        average_metrics(&peer, &local).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            assert_eq!(result, metrics(2.0, 0.5));
        }
    }
}
