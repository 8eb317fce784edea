//! Cross-replica reduction of losses and gradients
//!
//! Each replica runs loss and optimizer steps on a single logical stream.
//! With data parallelism, replicas exchange *summed* gradients plus their
//! sample counts; the reduced gradient is the grand sum divided by the total
//! sample count, so replicas with uneven batch sizes are weighted correctly.

use crate::loss::LossOutput;
use dermclass_core::{ensure_len, Error, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use tracing::{debug, trace};

/// One replica's loss contribution for a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossShard {
    /// Sum of per-sample losses
    pub loss_sum: f64,
    pub samples: usize,
}

impl LossShard {
    pub fn from_output(output: &LossOutput) -> Self {
        Self {
            loss_sum: output.value * output.samples as f64,
            samples: output.samples,
        }
    }
}

/// Mean loss across shards, weighted by sample count
pub fn reduce_loss_shards(shards: &[LossShard]) -> Result<f64> {
    let samples: usize = shards.iter().map(|s| s.samples).sum();
    if samples == 0 {
        return Err(Error::invalid("cannot reduce loss over zero samples"));
    }
    let sum: f64 = shards.iter().map(|s| s.loss_sum).sum();
    Ok(sum / samples as f64)
}

/// One replica's summed gradient for a step
#[derive(Debug, Clone, PartialEq)]
pub struct GradientShard {
    /// Gradient summed (not averaged) over the replica's samples
    pub sum: Vec<f64>,
    pub samples: usize,
}

impl GradientShard {
    pub fn new(sum: Vec<f64>, samples: usize) -> Self {
        Self { sum, samples }
    }

    /// Convert a batch-mean gradient into a summed shard
    pub fn from_mean(mean: &[f64], samples: usize) -> Self {
        Self {
            sum: mean.iter().map(|g| g * samples as f64).collect(),
            samples,
        }
    }

    /// Shard for the score-bias gradient of a loss evaluation
    pub fn from_output(output: &LossOutput) -> Self {
        Self::from_mean(&output.bias_gradient(), output.samples)
    }
}

/// Sum shards, then divide by the total sample count
pub fn reduce_gradients(shards: &[GradientShard]) -> Result<Vec<f64>> {
    let first = shards
        .first()
        .ok_or_else(|| Error::invalid("no gradient shards to reduce"))?;
    let dim = first.sum.len();
    let mut total = vec![0.0; dim];
    let mut samples = 0usize;
    for shard in shards {
        ensure_len("gradient shard", dim, shard.sum.len())?;
        for (acc, g) in total.iter_mut().zip(&shard.sum) {
            *acc += g;
        }
        samples += shard.samples;
    }
    if samples == 0 {
        return Err(Error::invalid("cannot reduce gradients over zero samples"));
    }
    let n = samples as f64;
    total.iter_mut().for_each(|g| *g /= n);
    Ok(total)
}

struct StepState {
    pending: Vec<Option<GradientShard>>,
    result: Option<std::result::Result<Arc<Vec<f64>>, String>>,
    step: u64,
}

struct Shared {
    barrier: Barrier,
    state: Mutex<StepState>,
}

/// Synchronous all-reduce among a fixed set of replicas.
///
/// Created as one [`Replica`] handle per participant; each handle is moved to
/// its own thread.
pub struct ReplicaGroup;

impl ReplicaGroup {
    /// Create `replicas` handles with ranks `0..replicas`
    pub fn new(replicas: usize) -> Result<Vec<Replica>> {
        if replicas == 0 {
            return Err(Error::config("replica group needs at least one replica"));
        }
        let shared = Arc::new(Shared {
            barrier: Barrier::new(replicas),
            state: Mutex::new(StepState {
                pending: vec![None; replicas],
                result: None,
                step: 0,
            }),
        });
        Ok((0..replicas)
            .map(|rank| Replica {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect())
    }
}

/// One participant in a [`ReplicaGroup`]
pub struct Replica {
    rank: usize,
    shared: Arc<Shared>,
}

impl Replica {
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Contribute a shard and block until every replica has contributed.
    ///
    /// All replicas receive the identical reduced gradient. Shards are summed
    /// in rank order, so the result does not depend on arrival order.
    pub fn all_reduce(&self, shard: GradientShard) -> Result<Vec<f64>> {
        self.shared.state.lock().pending[self.rank] = Some(shard);

        // Step boundary: every shard is in place.
        if self.shared.barrier.wait().is_leader() {
            let mut state = self.shared.state.lock();
            let shards: Vec<GradientShard> =
                state.pending.iter_mut().filter_map(Option::take).collect();
            state.result = Some(
                reduce_gradients(&shards)
                    .map(Arc::new)
                    .map_err(|e| e.to_string()),
            );
            state.step += 1;
            debug!(step = state.step, replicas = shards.len(), "Reduced replica gradients");
        }

        // Result is published before anyone reads it.
        self.shared.barrier.wait();

        let state = self.shared.state.lock();
        trace!(rank = self.rank, step = state.step, "Replica read reduced gradient");
        match &state.result {
            Some(Ok(gradient)) => Ok(gradient.as_ref().clone()),
            Some(Err(msg)) => Err(Error::internal(format!("all-reduce failed: {msg}"))),
            None => Err(Error::internal("all-reduce finished without a result")),
        }
    }
}
