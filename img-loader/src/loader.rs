//! The batch loader backed by a pool of blocking workers.

use crate::{
    collate::{Batch, Collate},
    common::*,
    dataset::Dataset,
    sampler::Sampler,
};

/// The options of [DataLoader].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DataLoaderInit {
    pub dataset: Box<dyn Dataset>,
    pub sampler: Arc<dyn Sampler>,
    pub collate: Arc<dyn Collate>,
    pub batch_size: usize,
    /// The number of workers. Zero still runs one background worker.
    pub num_workers: usize,
    /// Discard the trailing partial batch.
    pub drop_last: bool,
    /// The number of finished batches each worker may hold ahead of the consumer.
    pub prefetch_factor: usize,
}

impl DataLoaderInit {
    pub fn build(self) -> Result<DataLoader> {
        let Self {
            dataset,
            sampler,
            collate,
            batch_size,
            num_workers,
            drop_last,
            prefetch_factor,
        } = self;

        ensure!(batch_size > 0, "batch_size must be positive");
        ensure!(prefetch_factor > 0, "prefetch_factor must be positive");

        Ok(DataLoader {
            dataset,
            sampler,
            collate,
            batch_size,
            num_workers: num_workers.max(1),
            drop_last,
            prefetch_factor,
        })
    }
}

/// The loader that distributes batches over blocking workers.
///
/// Batch `b` of an epoch is loaded by worker `b % num_workers`. Each worker
/// owns a forked dataset, so storage handles are opened per worker and closed
/// when the worker exits. Batches are emitted in batch order.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DataLoader {
    dataset: Box<dyn Dataset>,
    sampler: Arc<dyn Sampler>,
    collate: Arc<dyn Collate>,
    batch_size: usize,
    num_workers: usize,
    drop_last: bool,
    prefetch_factor: usize,
}

impl DataLoader {
    /// The number of batches per epoch.
    pub fn len(&self) -> usize {
        let num_samples = self.sampler.len();
        if self.drop_last {
            num_samples / self.batch_size
        } else {
            (num_samples + self.batch_size - 1) / self.batch_size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_samples(&self) -> usize {
        self.sampler.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn dataset(&self) -> &dyn Dataset {
        self.dataset.as_ref()
    }

    pub fn sampler(&self) -> &dyn Sampler {
        self.sampler.as_ref()
    }

    pub fn collate(&self) -> &dyn Collate {
        self.collate.as_ref()
    }

    /// Split the sampler order of `epoch` into batches of indices.
    pub fn batch_indices(&self, epoch: usize) -> Vec<Vec<usize>> {
        let drop_last = self.drop_last;
        let batch_size = self.batch_size;

        self.sampler
            .indices(epoch)
            .chunks(batch_size)
            .filter(|chunk| !drop_last || chunk.len() == batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Start the workers for `epoch` and stream the batches.
    ///
    /// Must be called within a tokio runtime. Dropping the stream stops the
    /// workers after their current batch.
    pub fn stream(&self, epoch: usize) -> Result<BoxStream<'static, Result<Batch>>> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("the data loader must be started within a tokio runtime")?;
        let batches = self.batch_indices(epoch);
        let num_batches = batches.len();
        let num_workers = self.num_workers.min(num_batches).max(1);

        let (job_txs, job_rxs): (Vec<_>, Vec<_>) =
            (0..num_workers).map(|_| flume::unbounded()).unzip();
        let (output_txs, output_rxs): (Vec<_>, Vec<_>) = (0..num_workers)
            .map(|_| flume::bounded::<Result<Batch>>(self.prefetch_factor))
            .unzip();

        for (batch_index, indices) in batches.into_iter().enumerate() {
            // the receivers are alive at this point
            let _ = job_txs[batch_index % num_workers].send((batch_index, indices));
        }
        drop(job_txs);

        izip!(0.., job_rxs, output_txs).for_each(|(worker_index, job_rx, output_tx)| {
            let dataset = self.dataset.fork();
            let collate = self.collate.clone();

            runtime.spawn_blocking(move || {
                debug!("loader worker {} started", worker_index);

                while let Ok((batch_index, indices)) = job_rx.recv() {
                    let result = load_batch(dataset.as_ref(), collate.as_ref(), &indices)
                        .with_context(|| format!("failed to load batch {}", batch_index));
                    if output_tx.send(result).is_err() {
                        break;
                    }
                }

                debug!("loader worker {} stopped", worker_index);
            });
        });

        debug!(
            "epoch {}: {} batches on {} workers",
            epoch, num_batches, num_workers
        );

        let stream = stream::iter(0..num_batches)
            .then(move |batch_index| {
                let output_rx = output_rxs[batch_index % num_workers].clone();
                async move {
                    match output_rx.recv_async().await {
                        Ok(result) => result,
                        Err(_) => Err(format_err!(
                            "the worker of batch {} exited unexpectedly",
                            batch_index
                        )),
                    }
                }
            })
            .boxed();

        Ok(stream)
    }
}

fn load_batch(dataset: &dyn Dataset, collate: &dyn Collate, indices: &[usize]) -> Result<Batch> {
    let samples: Vec<_> = indices
        .iter()
        .map(|&index| {
            dataset
                .get(index)
                .with_context(|| format!("failed to load sample {}", index))
        })
        .try_collect()?;
    collate.collate(samples)
}
