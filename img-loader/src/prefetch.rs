//! The double-buffered device prefetcher.
//!
//! Each batch pulled from the loader is moved to the device, cast, normalized
//! and optionally erased on a blocking task. The task handle is the ready
//! signal: the pipeline hands out the previous batch only after its task has
//! finished, while the task of the next batch keeps running.

use crate::{
    collate::Batch, common::*, dataset::Dataset, erasing::RandomErasing, loader::DataLoader,
    sampler::Sampler,
};
use tokio::task::JoinHandle;

/// The floating point precision of prefetched images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    /// 32-bit float.
    Standard,
    /// 16-bit float.
    Reduced,
}

impl Default for Precision {
    fn default() -> Self {
        Self::Standard
    }
}

impl Precision {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Standard => Kind::Float,
            Self::Reduced => Kind::Half,
        }
    }
}

/// The options of [PrefetchPipeline].
#[derive(Debug)]
pub struct PrefetchInit {
    /// Per-channel mean in [0, 1].
    pub mean: [f64; 3],
    /// Per-channel standard deviation in [0, 1].
    pub std: [f64; 3],
    pub precision: Precision,
    pub erasing: Option<RandomErasing>,
    pub device: Device,
}

impl PrefetchInit {
    pub fn build(self, loader: DataLoader) -> Result<PrefetchPipeline> {
        let Self {
            mean,
            std,
            precision,
            erasing,
            device,
        } = self;

        ensure!(
            std.iter().all(|&value| value > 0.0),
            "the standard deviation {:?} must be positive",
            std
        );

        let kind = precision.kind();
        // scaled to the byte range of the collated images
        let to_tensor = |values: [f64; 3]| -> Tensor {
            let scaled: Vec<f64> = values.iter().map(|value| value * 255.0).collect();
            Tensor::of_slice(&scaled)
                .view([1, 3, 1, 1])
                .to_kind(kind)
                .to_device(device)
        };
        let normalizer = Normalizer {
            mean: to_tensor(mean),
            std: to_tensor(std),
            kind,
            device,
            erasing,
        };

        Ok(PrefetchPipeline { loader, normalizer })
    }
}

/// The device-side processing owned by the batch in flight.
#[derive(Debug)]
struct Normalizer {
    mean: Tensor,
    std: Tensor,
    kind: Kind,
    device: Device,
    erasing: Option<RandomErasing>,
}

impl Normalizer {
    fn duplicate(&self) -> Self {
        Self {
            mean: self.mean.shallow_clone(),
            std: self.std.shallow_clone(),
            kind: self.kind,
            device: self.device,
            erasing: self.erasing.clone(),
        }
    }

    fn process(&self, batch: Batch) -> Result<Batch> {
        tch::no_grad(|| -> Result<_> {
            let Batch { images, targets } = batch;
            let mut images = images.to_device(self.device).to_kind(self.kind);
            let targets = targets.to_device(self.device);

            let _ = images.f_sub_(&self.mean)?;
            let _ = images.f_div_(&self.std)?;
            if let Some(erasing) = &self.erasing {
                erasing.apply(&images)?;
            }

            Ok(Batch { images, targets })
        })
    }
}

/// The loader wrapper that prepares the next batch while the current one is used.
#[derive(Debug)]
pub struct PrefetchPipeline {
    loader: DataLoader,
    normalizer: Normalizer,
}

impl PrefetchPipeline {
    /// The number of batches per epoch.
    pub fn len(&self) -> usize {
        self.loader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loader.is_empty()
    }

    pub fn loader(&self) -> &DataLoader {
        &self.loader
    }

    pub fn sampler(&self) -> &dyn Sampler {
        self.loader.sampler()
    }

    pub fn dataset(&self) -> &dyn Dataset {
        self.loader.dataset()
    }

    pub fn device(&self) -> Device {
        self.normalizer.device
    }

    /// Whether the collator mixes batches. False if it cannot mix.
    pub fn mixup_enabled(&self) -> bool {
        self.loader
            .collate()
            .mixup()
            .map(|toggle| toggle.mixup_enabled())
            .unwrap_or(false)
    }

    /// Switch batch mixing of the collator if it supports mixing.
    pub fn set_mixup_enabled(&self, enabled: bool) {
        if let Some(toggle) = self.loader.collate().mixup() {
            toggle.set_mixup_enabled(enabled);
        }
    }

    /// Start iterating over `epoch`.
    pub fn epoch(&self, epoch: usize) -> Result<PrefetchIter> {
        Ok(PrefetchIter {
            source: self.loader.stream(epoch)?,
            normalizer: Some(self.normalizer.duplicate()),
            pending: None,
            state: PrefetchState::Empty,
        })
    }
}

/// The observable phase of a [PrefetchIter].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefetchState {
    /// Nothing is pulled yet.
    Empty,
    /// The first batch is in flight and nothing is yielded yet.
    Priming,
    /// A batch was yielded and the next one is in flight.
    Steady,
    /// The source is exhausted and the last batch was flushed.
    Draining,
    Closed,
}

type Pending = JoinHandle<(Normalizer, Result<Batch>)>;

/// The iterator of one prefetched epoch.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PrefetchIter {
    #[derivative(Debug = "ignore")]
    source: BoxStream<'static, Result<Batch>>,
    normalizer: Option<Normalizer>,
    #[derivative(Debug = "ignore")]
    pending: Option<Pending>,
    state: PrefetchState,
}

impl PrefetchIter {
    pub fn state(&self) -> PrefetchState {
        self.state
    }

    /// Whether a batch is being prepared.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Get the next processed batch in loader order.
    pub async fn next(&mut self) -> Option<Result<Batch>> {
        loop {
            match self.state {
                PrefetchState::Closed => return None,
                PrefetchState::Draining => {
                    self.state = PrefetchState::Closed;
                    return None;
                }
                PrefetchState::Empty | PrefetchState::Priming | PrefetchState::Steady => {}
            }

            match self.source.next().await {
                Some(Ok(batch)) => {
                    let previous = match self.pending.take() {
                        Some(pending) => Some(self.finish(pending).await),
                        None => None,
                    };
                    if let Err(err) = self.submit(batch) {
                        self.shutdown();
                        return Some(Err(err));
                    }

                    match previous {
                        Some(result) => {
                            self.state = PrefetchState::Steady;
                            return Some(result);
                        }
                        None => {
                            self.state = PrefetchState::Priming;
                        }
                    }
                }
                Some(Err(err)) => {
                    self.close().await;
                    return Some(Err(err));
                }
                None => {
                    return match self.pending.take() {
                        Some(pending) => {
                            self.state = PrefetchState::Draining;
                            Some(self.finish(pending).await)
                        }
                        None => {
                            self.shutdown();
                            None
                        }
                    };
                }
            }
        }
    }

    /// Wait for the batch in flight and stop the loader.
    pub async fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            if let Err(err) = self.finish(pending).await {
                debug!("discard the in-flight batch: {:#}", err);
            }
        }
        self.shutdown();
    }

    /// Convert into a stream of processed batches.
    pub fn into_stream(self) -> BoxStream<'static, Result<Batch>> {
        stream::unfold(self, |mut iter| async move {
            let item = iter.next().await?;
            Some((item, iter))
        })
        .boxed()
    }

    fn submit(&mut self, batch: Batch) -> Result<()> {
        let normalizer = self
            .normalizer
            .take()
            .ok_or_else(|| format_err!("the prefetch worker was lost"))?;
        let pending = tokio::task::spawn_blocking(move || {
            let result = normalizer.process(batch);
            (normalizer, result)
        });
        self.pending = Some(pending);
        Ok(())
    }

    async fn finish(&mut self, pending: Pending) -> Result<Batch> {
        let (normalizer, result) = pending
            .await
            .map_err(|err| format_err!("the prefetch task failed: {}", err))?;
        self.normalizer = Some(normalizer);
        result
    }

    fn shutdown(&mut self) {
        // dropping the source stops the loader workers
        self.source = stream::empty().boxed();
        self.state = PrefetchState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collate::{Collate, FastCollate, MixupFlag, MixupToggle},
        dataset::testing::MemoryDataset,
        loader::DataLoaderInit,
        payload::Payload,
        sampler::SequentialSampler,
    };
    use approx::assert_abs_diff_eq;

    fn pipeline(len: usize, mean: [f64; 3], std: [f64; 3]) -> Result<PrefetchPipeline> {
        pipeline_with_precision(len, mean, std, Precision::Standard)
    }

    fn pipeline_with_precision(
        len: usize,
        mean: [f64; 3],
        std: [f64; 3],
        precision: Precision,
    ) -> Result<PrefetchPipeline> {
        let loader = DataLoaderInit {
            dataset: Box::new(MemoryDataset::arrays(len)),
            sampler: Arc::new(SequentialSampler::new(len)),
            collate: Arc::new(FastCollate),
            batch_size: 2,
            num_workers: 2,
            drop_last: false,
            prefetch_factor: 2,
        }
        .build()?;

        PrefetchInit {
            mean,
            std,
            precision,
            erasing: None,
            device: Device::Cpu,
        }
        .build(loader)
    }

    fn identity() -> ([f64; 3], [f64; 3]) {
        ([0.0; 3], [1.0 / 255.0; 3])
    }

    #[tokio::test]
    async fn prefetch_lag_test() -> Result<()> {
        let (mean, std) = identity();
        let pipeline = pipeline(6, mean, std)?;
        let mut iter = pipeline.epoch(0)?;
        assert_eq!(iter.state(), PrefetchState::Empty);

        let mut firsts = vec![];
        let mut states = vec![];
        while let Some(batch) = iter.next().await {
            let batch = batch?;
            assert_eq!(batch.images.kind(), Kind::Float);
            firsts.push(batch.images.double_value(&[0, 0, 0, 0]));
            states.push((iter.state(), iter.has_pending()));
        }

        assert_eq!(firsts, [0.0, 2.0, 4.0]);
        assert_eq!(
            states,
            [
                (PrefetchState::Steady, true),
                (PrefetchState::Steady, true),
                (PrefetchState::Draining, false),
            ]
        );
        assert_eq!(iter.state(), PrefetchState::Closed);
        assert!(iter.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn single_batch_test() -> Result<()> {
        let (mean, std) = identity();
        let pipeline = pipeline(2, mean, std)?;
        let mut iter = pipeline.epoch(0)?;

        let batch = iter.next().await.transpose()?;
        assert!(batch.is_some());
        assert_eq!(iter.state(), PrefetchState::Draining);
        assert!(iter.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn normalization_test() -> Result<()> {
        let pipeline = pipeline(4, [0.5; 3], [0.25; 3])?;
        let batches: Vec<_> = pipeline.epoch(0)?.into_stream().try_collect().await?;
        assert_eq!(batches.len(), 2);

        // the sample at index 3 is filled with 3
        let value = batches[1].images.double_value(&[1, 2, 1, 1]);
        assert_abs_diff_eq!(value, (3.0 - 127.5) / 63.75, epsilon = 1e-5);
        assert_eq!(Vec::<i64>::from(&batches[1].targets), [2, 0]);
        Ok(())
    }

    #[tokio::test]
    async fn reduced_precision_test() -> Result<()> {
        let pipeline = pipeline_with_precision(4, [0.5; 3], [0.25; 3], Precision::Reduced)?;
        let batches: Vec<_> = pipeline.epoch(0)?.into_stream().try_collect().await?;
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|batch| batch.images.kind() == Kind::Half));
        assert!(batches.iter().all(|batch| batch.targets.kind() == Kind::Int64));

        let images = batches[1].images.to_kind(Kind::Float);
        let value = images.double_value(&[0, 0, 1, 0]);
        assert_abs_diff_eq!(value, (2.0 - 127.5) / 63.75, epsilon = 1e-2);
        Ok(())
    }

    #[tokio::test]
    async fn close_test() -> Result<()> {
        let (mean, std) = identity();
        let pipeline = pipeline(10, mean, std)?;
        let mut iter = pipeline.epoch(0)?;

        iter.next().await.transpose()?;
        assert!(iter.has_pending());
        iter.close().await;
        assert!(!iter.has_pending());
        assert_eq!(iter.state(), PrefetchState::Closed);
        assert!(iter.next().await.is_none());
        Ok(())
    }

    #[derive(Debug)]
    struct MixingCollate {
        flag: MixupFlag,
    }

    impl Collate for MixingCollate {
        fn collate(&self, samples: Vec<(Payload, i64)>) -> Result<Batch> {
            FastCollate.collate(samples)
        }

        fn mixup(&self) -> Option<&dyn MixupToggle> {
            Some(&self.flag)
        }
    }

    #[test]
    fn mixup_forwarding_test() -> Result<()> {
        let (mean, std) = identity();
        let plain = pipeline(2, mean, std)?;
        plain.set_mixup_enabled(true);
        assert!(!plain.mixup_enabled());

        let loader = DataLoaderInit {
            dataset: Box::new(MemoryDataset::arrays(2)),
            sampler: Arc::new(SequentialSampler::new(2)),
            collate: Arc::new(MixingCollate {
                flag: MixupFlag::new(true),
            }),
            batch_size: 2,
            num_workers: 1,
            drop_last: false,
            prefetch_factor: 1,
        }
        .build()?;
        let mixing = PrefetchInit {
            mean,
            std,
            precision: Precision::Standard,
            erasing: None,
            device: Device::Cpu,
        }
        .build(loader)?;

        assert!(mixing.mixup_enabled());
        mixing.set_mixup_enabled(false);
        assert!(!mixing.mixup_enabled());
        Ok(())
    }
}
