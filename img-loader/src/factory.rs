//! Building datasets and loaders from configuration.

use crate::{
    class_index::ClassIndex,
    collate::{Batch, Collate, FastCollate, StackCollate},
    common::*,
    config::{ClassMapSource, DatasetConfig, DatasetKind, LoaderConfig},
    dataset::{
        AugSplitDataset, Dataset, FolderDatasetInit, ManifestDatasetInit, TarDatasetInit,
    },
    erasing::RandomErasingInit,
    loader::{DataLoader, DataLoaderInit},
    prefetch::{PrefetchInit, PrefetchIter, PrefetchPipeline},
    sampler::{
        DistributedSampler, OrderedDistributedSampler, RandomSampler, Sampler, SequentialSampler,
    },
    transform::TransformSpec,
};

/// Open the dataset described by the configuration.
pub fn open_dataset(config: &DatasetConfig) -> Result<Box<dyn Dataset>> {
    let DatasetConfig {
        kind,
        class_map,
        load_mode,
    } = config;
    let load_mode = *load_mode;

    let class_index = match class_map {
        Some(ClassMapSource::File(path)) => Some(ClassIndex::load(path, kind.root())?),
        Some(ClassMapSource::List(text)) => Some(ClassIndex::from_class_list(text)?),
        None => None,
    };

    let dataset: Box<dyn Dataset> = match kind {
        DatasetKind::Folder {
            root,
            labeling,
            sort,
        } => Box::new(
            FolderDatasetInit {
                root: root.clone(),
                load_mode,
                labeling: *labeling,
                class_index,
                sort: *sort,
            }
            .build()?,
        ),
        DatasetKind::Tar { path, labeling } => Box::new(
            TarDatasetInit {
                path: path.clone(),
                load_mode,
                labeling: *labeling,
                class_index,
            }
            .build()?,
        ),
        DatasetKind::Manifest { lists, root, sort } => Box::new(
            ManifestDatasetInit {
                root: root.clone(),
                load_mode,
                class_index,
                sort: *sort,
                ..ManifestDatasetInit::new(lists)
            }
            .build()?,
        ),
    };

    Ok(dataset)
}

/// A loader with or without device prefetching.
#[derive(Debug)]
pub enum Loader {
    Plain(DataLoader),
    Prefetch(PrefetchPipeline),
}

impl Loader {
    /// The number of batches per epoch.
    pub fn len(&self) -> usize {
        match self {
            Self::Plain(loader) => loader.len(),
            Self::Prefetch(pipeline) => pipeline.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn loader(&self) -> &DataLoader {
        match self {
            Self::Plain(loader) => loader,
            Self::Prefetch(pipeline) => pipeline.loader(),
        }
    }

    pub fn dataset(&self) -> &dyn Dataset {
        self.loader().dataset()
    }

    pub fn sampler(&self) -> &dyn Sampler {
        self.loader().sampler()
    }

    pub fn mixup_enabled(&self) -> bool {
        self.loader()
            .collate()
            .mixup()
            .map(|toggle| toggle.mixup_enabled())
            .unwrap_or(false)
    }

    pub fn set_mixup_enabled(&self, enabled: bool) {
        if let Some(toggle) = self.loader().collate().mixup() {
            toggle.set_mixup_enabled(enabled);
        }
    }

    /// Start iterating over `epoch` with a handle that can be closed early.
    pub fn epoch(&self, epoch: usize) -> Result<LoaderIter> {
        let iter = match self {
            Self::Plain(loader) => LoaderIter::Plain(loader.stream(epoch)?),
            Self::Prefetch(pipeline) => LoaderIter::Prefetch(pipeline.epoch(epoch)?),
        };
        Ok(iter)
    }

    /// Stream the batches of `epoch`.
    ///
    /// Dropping the stream before the end does not wait for the batch being
    /// prefetched. Use [Loader::epoch] and [LoaderIter::close] to stop early.
    pub fn stream(&self, epoch: usize) -> Result<BoxStream<'static, Result<Batch>>> {
        let stream = match self {
            Self::Plain(loader) => loader.stream(epoch)?,
            Self::Prefetch(pipeline) => pipeline.epoch(epoch)?.into_stream(),
        };
        Ok(stream)
    }
}

/// The iterator of one epoch of a [Loader].
#[derive(Derivative)]
#[derivative(Debug)]
pub enum LoaderIter {
    Plain(#[derivative(Debug = "ignore")] BoxStream<'static, Result<Batch>>),
    Prefetch(PrefetchIter),
}

impl LoaderIter {
    pub async fn next(&mut self) -> Option<Result<Batch>> {
        match self {
            Self::Plain(stream) => stream.next().await,
            Self::Prefetch(iter) => iter.next().await,
        }
    }

    /// Whether a batch is being prepared on the device.
    pub fn has_pending(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Prefetch(iter) => iter.has_pending(),
        }
    }

    /// Wait for the batch in flight and stop the workers.
    pub async fn close(&mut self) {
        match self {
            Self::Plain(stream) => *stream = stream::empty().boxed(),
            Self::Prefetch(iter) => iter.close().await,
        }
    }
}

/// Assemble the loader of a dataset.
///
/// With `num_aug_splits > 1` the transform must be staged, and the dataset is
/// wrapped into [AugSplitDataset]. A caller-supplied `collate` replaces the
/// default collator.
pub fn create_loader(
    mut dataset: Box<dyn Dataset>,
    transform: Option<TransformSpec>,
    collate: Option<Arc<dyn Collate>>,
    config: &LoaderConfig,
) -> Result<Loader> {
    let LoaderConfig {
        batch_size,
        is_training,
        use_prefetcher,
        num_workers,
        prefetch_factor,
        distributed,
        pin_memory,
        mean,
        std,
        precision,
        ref erasing,
        num_aug_splits,
        device,
        seed,
    } = *config;

    let dataset: Box<dyn Dataset> = if num_aug_splits > 1 {
        let transform = transform.ok_or_else(|| {
            format_err!("augmentation split requires a (base, augmentation, normalization) transform")
        })?;
        Box::new(AugSplitDataset::new(dataset, transform, num_aug_splits)?)
    } else {
        if let Some(transform) = transform {
            dataset.set_transform(Some(transform.into_composed()));
        }
        dataset
    };

    let len = dataset.len();
    let sampler: Arc<dyn Sampler> = match (distributed, is_training) {
        (Some(replica), true) => Arc::new(DistributedSampler::new(
            len,
            replica.num_replicas,
            replica.rank,
            true,
            seed,
        )?),
        (Some(replica), false) => Arc::new(OrderedDistributedSampler::new(
            len,
            replica.num_replicas,
            replica.rank,
        )?),
        (None, true) => Arc::new(RandomSampler::new(len, seed)),
        (None, false) => Arc::new(SequentialSampler::new(len)),
    };

    let collate: Arc<dyn Collate> = match collate {
        Some(collate) => collate,
        None if use_prefetcher => Arc::new(FastCollate),
        None => Arc::new(StackCollate),
    };

    if pin_memory {
        warn!("pin_memory is not supported and is ignored");
    }

    let loader = DataLoaderInit {
        dataset,
        sampler,
        collate,
        batch_size,
        num_workers,
        drop_last: is_training,
        prefetch_factor,
    }
    .build()?;

    if !use_prefetcher {
        return Ok(Loader::Plain(loader));
    }

    let erasing = if is_training && erasing.prob.raw() > 0.0 {
        let erasing = RandomErasingInit {
            probability: erasing.prob.raw(),
            mode: erasing.mode,
            min_area: erasing.min_area.raw(),
            max_area: erasing.max_area.raw(),
            min_count: 1,
            max_count: erasing.count,
            num_splits: erasing.num_splits(num_aug_splits),
            ..Default::default()
        }
        .build()?;
        Some(erasing)
    } else {
        None
    };

    let pipeline = PrefetchInit {
        mean: mean.map(|value| value.raw()),
        std: std.map(|value| value.raw()),
        precision,
        erasing,
        device,
    }
    .build(loader)?;

    info!(
        "created loader with {} batches of {} on {:?}",
        pipeline.len(),
        batch_size,
        device
    );

    Ok(Loader::Prefetch(pipeline))
}
