//! Producer/consumer batch loading
//!
//! `W` worker tasks prepare batches concurrently while a single consumer
//! drains them in order. Worker `w` owns batches `w, w + W, w + 2W, ...` and
//! pushes them into its own bounded channel; the consumer reads the channels
//! round-robin, so batch order is deterministic for a given seed and epoch
//! while back-pressure still bounds memory to `prefetch` batches per worker.

use async_trait::async_trait;
use dermclass_core::{Error, Result};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Indexed access to training samples
#[async_trait]
pub trait SampleSource: Send + Sync + 'static {
    type Sample: Send + 'static;

    /// Number of samples
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load (decode, augment, ...) one sample
    async fn load(&self, index: usize) -> Result<Self::Sample>;
}

/// Loader settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Worker tasks; defaults to the number of CPUs
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Batches buffered per worker
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    #[serde(default = "default_true")]
    pub shuffle: bool,

    #[serde(default)]
    pub seed: u64,

    /// Drop a trailing partial batch
    #[serde(default)]
    pub drop_last: bool,
}

fn default_batch_size() -> usize {
    32
}

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_prefetch() -> usize {
    2
}

fn default_true() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            prefetch: default_prefetch(),
            shuffle: true,
            seed: 0,
            drop_last: false,
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }
        if self.workers == 0 {
            return Err(Error::config("workers must be > 0"));
        }
        if self.prefetch == 0 {
            return Err(Error::config("prefetch must be > 0"));
        }
        Ok(())
    }
}

/// One batch of loaded samples
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    /// Position of the batch within its epoch
    pub index: usize,
    /// Source indices of the samples, in batch order
    pub sample_indices: Vec<usize>,
    pub samples: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Concurrent batch loader over a [`SampleSource`]
pub struct BatchLoader<S: SampleSource> {
    source: Arc<S>,
    config: LoaderConfig,
}

impl<S: SampleSource> BatchLoader<S> {
    pub fn new(source: S, config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source: Arc::new(source),
            config,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Sample order for an epoch (seeded shuffle when enabled)
    pub fn epoch_order(&self, epoch: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.source.len()).collect();
        if self.config.shuffle {
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch));
            order.shuffle(&mut rng);
        }
        order
    }

    fn plan(&self, epoch: u64) -> Vec<Vec<usize>> {
        let mut batches: Vec<Vec<usize>> = self
            .epoch_order(epoch)
            .chunks(self.config.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        if self.config.drop_last {
            if let Some(last) = batches.last() {
                if last.len() < self.config.batch_size {
                    batches.pop();
                }
            }
        }
        batches
    }

    /// Number of batches one epoch yields
    pub fn num_batches(&self) -> usize {
        let n = self.source.len();
        let b = self.config.batch_size;
        if self.config.drop_last {
            n / b
        } else {
            n.div_ceil(b)
        }
    }

    /// Start producing batches for `epoch`.
    ///
    /// Must be called within a tokio runtime. Dropping the returned stream
    /// stops the workers.
    pub fn epoch(&self, epoch: u64) -> EpochBatches<S::Sample> {
        let plan = Arc::new(self.plan(epoch));
        let total = plan.len();
        let workers = self.config.workers.min(total.max(1));

        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, rx) = mpsc::channel(self.config.prefetch);
            receivers.push(rx);
            let source = Arc::clone(&self.source);
            let plan = Arc::clone(&plan);
            handles.push(tokio::spawn(produce(source, plan, worker, workers, tx)));
        }

        debug!(epoch, batches = total, workers, "Started epoch loading");
        EpochBatches {
            receivers,
            handles,
            next: 0,
            total,
        }
    }
}

async fn produce<S: SampleSource>(
    source: Arc<S>,
    plan: Arc<Vec<Vec<usize>>>,
    worker: usize,
    workers: usize,
    tx: mpsc::Sender<Result<Batch<S::Sample>>>,
) {
    for index in (worker..plan.len()).step_by(workers) {
        let sample_indices = plan[index].clone();
        let mut samples = Vec::with_capacity(sample_indices.len());
        let mut failure = None;
        for &i in &sample_indices {
            match source.load(i).await {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let message = match failure {
            Some(e) => {
                warn!(worker, batch = index, error = %e, "Sample loading failed");
                Err(e)
            }
            None => Ok(Batch {
                index,
                sample_indices,
                samples,
            }),
        };
        let failed = message.is_err();
        if tx.send(message).await.is_err() || failed {
            // Consumer went away, or this worker's stream is poisoned.
            return;
        }
    }
}

/// Single-consumer stream of one epoch's batches, in plan order
pub struct EpochBatches<T> {
    receivers: Vec<mpsc::Receiver<Result<Batch<T>>>>,
    handles: Vec<JoinHandle<()>>,
    next: usize,
    total: usize,
}

impl<T> EpochBatches<T> {
    /// Batches remaining in this epoch
    pub fn remaining(&self) -> usize {
        self.total - self.next
    }

    /// Next batch, or `None` once the epoch is exhausted.
    ///
    /// A loading error is yielded once; the epoch ends after it.
    pub async fn next(&mut self) -> Option<Result<Batch<T>>> {
        if self.next >= self.total {
            return None;
        }
        let worker = self.next % self.receivers.len();
        match self.receivers[worker].recv().await {
            Some(Ok(batch)) => {
                self.next += 1;
                Some(Ok(batch))
            }
            Some(Err(e)) => {
                self.next = self.total;
                Some(Err(e))
            }
            None => {
                self.next = self.total;
                Some(Err(Error::internal(format!(
                    "loader worker {worker} stopped before finishing its batches"
                ))))
            }
        }
    }
}

impl<T> Drop for EpochBatches<T> {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
