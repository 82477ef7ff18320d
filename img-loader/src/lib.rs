//! Image classification data loading: sample indexing, collation and device prefetching.

mod common;
pub mod class_index;
pub mod collate;
pub mod config;
pub mod dataset;
pub mod erasing;
pub mod error;
pub mod factory;
pub mod loader;
pub mod payload;
pub mod prefetch;
pub mod sample;
pub mod sampler;
pub mod transform;

pub use class_index::ClassIndex;
pub use collate::{Batch, Collate, FastCollate, MixupToggle, StackCollate};
pub use dataset::{
    AugSplitDataset, Dataset, FolderDataset, Labeling, LoadMode, ManifestDataset, TarDataset,
};
pub use error::DataError;
pub use factory::{create_loader, open_dataset, Loader, LoaderIter};
pub use loader::{DataLoader, DataLoaderInit};
pub use payload::Payload;
pub use prefetch::{PrefetchInit, PrefetchIter, PrefetchPipeline, PrefetchState};
pub use sampler::{
    DistributedSampler, OrderedDistributedSampler, RandomSampler, Sampler, SequentialSampler,
};
pub use transform::{Transform, TransformSpec};
