//! Index orders for one epoch.

use crate::common::*;

/// The strategy that orders dataset indices for an epoch.
pub trait Sampler
where
    Self: Debug + Send + Sync,
{
    /// The indices visited in `epoch`.
    fn indices(&self, epoch: usize) -> Vec<usize>;

    /// The number of indices per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Visit all indices in order.
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    len: usize,
}

impl SequentialSampler {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Sampler for SequentialSampler {
    fn indices(&self, _epoch: usize) -> Vec<usize> {
        (0..self.len).collect()
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Visit all indices in a shuffled order determined by the seed and the epoch.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    len: usize,
    seed: u64,
}

impl RandomSampler {
    pub fn new(len: usize, seed: u64) -> Self {
        Self { len, seed }
    }
}

impl Sampler for RandomSampler {
    fn indices(&self, epoch: usize) -> Vec<usize> {
        shuffled(self.len, self.seed, epoch)
    }

    fn len(&self) -> usize {
        self.len
    }
}

fn shuffled(len: usize, seed: u64, epoch: usize) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
    let mut indices: Vec<_> = (0..len).collect();
    indices.shuffle(&mut rng);
    indices
}

/// Pad `indices` by repeating its head until it has `total` entries.
fn pad_cyclic(mut indices: Vec<usize>, total: usize) -> Vec<usize> {
    if indices.is_empty() {
        return indices;
    }
    while indices.len() < total {
        let take = (total - indices.len()).min(indices.len());
        indices.extend_from_within(..take);
    }
    indices
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Partition {
    num_replicas: usize,
    rank: usize,
    per_replica: usize,
}

impl Partition {
    fn new(dataset_len: usize, num_replicas: usize, rank: usize) -> Result<Self> {
        ensure!(num_replicas > 0, "num_replicas must be positive");
        ensure!(
            rank < num_replicas,
            "rank {} is out of range for {} replicas",
            rank,
            num_replicas
        );
        let per_replica = (dataset_len + num_replicas - 1) / num_replicas;
        Ok(Self {
            num_replicas,
            rank,
            per_replica,
        })
    }

    fn total(&self) -> usize {
        self.per_replica * self.num_replicas
    }
}

/// The order-preserving evaluation sampler of one replica.
///
/// The index list is padded by repeating its head until every replica gets
/// `ceil(len / num_replicas)` entries, then replica `rank` takes the `rank`-th
/// contiguous chunk. Callers aggregating per-sample metrics must drop the
/// padded duplicates at the tail.
#[derive(Debug, Clone)]
pub struct OrderedDistributedSampler {
    dataset_len: usize,
    partition: Partition,
}

impl OrderedDistributedSampler {
    pub fn new(dataset_len: usize, num_replicas: usize, rank: usize) -> Result<Self> {
        Ok(Self {
            dataset_len,
            partition: Partition::new(dataset_len, num_replicas, rank)?,
        })
    }

    /// The number of padded duplicates over all replicas.
    pub fn num_padded(&self) -> usize {
        self.partition.total() - self.dataset_len
    }
}

impl Sampler for OrderedDistributedSampler {
    fn indices(&self, _epoch: usize) -> Vec<usize> {
        let Partition {
            rank, per_replica, ..
        } = self.partition;
        let padded = pad_cyclic((0..self.dataset_len).collect(), self.partition.total());
        padded
            .into_iter()
            .skip(rank * per_replica)
            .take(per_replica)
            .collect()
    }

    fn len(&self) -> usize {
        self.partition.per_replica
    }
}

/// The shuffling training sampler of one replica.
///
/// All replicas shuffle with the same seed and epoch, pad the order to equal
/// shares and take every `num_replicas`-th index starting at `rank`.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    dataset_len: usize,
    partition: Partition,
    shuffle: bool,
    seed: u64,
}

impl DistributedSampler {
    pub fn new(
        dataset_len: usize,
        num_replicas: usize,
        rank: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        Ok(Self {
            dataset_len,
            partition: Partition::new(dataset_len, num_replicas, rank)?,
            shuffle,
            seed,
        })
    }
}

impl Sampler for DistributedSampler {
    fn indices(&self, epoch: usize) -> Vec<usize> {
        let Partition {
            num_replicas, rank, ..
        } = self.partition;
        let order = if self.shuffle {
            shuffled(self.dataset_len, self.seed, epoch)
        } else {
            (0..self.dataset_len).collect()
        };
        pad_cyclic(order, self.partition.total())
            .into_iter()
            .skip(rank)
            .step_by(num_replicas)
            .collect()
    }

    fn len(&self) -> usize {
        self.partition.per_replica
    }
}
