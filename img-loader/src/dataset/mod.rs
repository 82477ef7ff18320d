//! Random-access datasets over directory trees, tar archives and manifest lists.

mod archive;
mod aug_split;
mod folder;
mod manifest;
#[cfg(test)]
pub(crate) mod testing;

pub use archive::*;
pub use aug_split::*;
pub use folder::*;
pub use manifest::*;

use crate::{class_index::ClassIndex, common::*, payload::Payload, transform::Transform};

/// The random-access dataset.
///
/// A dataset is built once and its sample and class indexes stay immutable.
/// Each parallel worker takes its own copy with [Dataset::fork], which shares
/// the indexes but opens storage handles on its own.
pub trait Dataset
where
    Self: Debug + Send,
{
    /// The number of samples.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the payload and label of the sample at `index`.
    ///
    /// Unlabeled samples get the label 0.
    fn get(&self, index: usize) -> Result<(Payload, i64)>;

    /// The display string of the sample locator, e.g. the file path.
    fn locator_of(&self, index: usize) -> Result<String>;

    /// The class index of the dataset.
    fn classes(&self) -> &ClassIndex;

    /// Replace the per-sample transform.
    fn set_transform(&mut self, transform: Option<Arc<dyn Transform>>);

    /// Create a worker-owned copy with unopened storage handles.
    fn fork(&self) -> Box<dyn Dataset>;

    /// The locators of the samples at `indices`, or of all samples if `indices` is empty.
    fn filenames(&self, indices: &[usize], basename: bool) -> Result<Vec<String>> {
        let to_name = |index: usize| -> Result<String> {
            let locator = self.locator_of(index)?;
            if !basename {
                return Ok(locator);
            }
            let name = Path::new(&locator)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or(locator);
            Ok(name)
        };

        if indices.is_empty() {
            (0..self.len()).map(to_name).collect()
        } else {
            indices.iter().cloned().map(to_name).collect()
        }
    }
}

/// Whether to return file bytes or decoded images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadMode {
    /// Return the raw file content and leave decoding to the transform.
    Bytes,
    /// Decode into a 3-channel RGB image.
    Decode,
}

impl Default for LoadMode {
    fn default() -> Self {
        Self::Decode
    }
}

/// How the label of a file is derived from its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Labeling {
    /// The name of the immediate parent directory.
    LeafName,
    /// The path relative to the root with separators replaced by `_`.
    FlattenedPath,
    /// No label.
    Unlabeled,
}

impl Default for Labeling {
    fn default() -> Self {
        Self::LeafName
    }
}

impl Labeling {
    /// Derive the label of a file in `rel_dir`, the directory relative to the root.
    pub fn label_of(&self, rel_dir: &Path) -> Option<String> {
        match self {
            Self::LeafName => {
                let label = rel_dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Some(label)
            }
            Self::FlattenedPath => {
                let label = rel_dir
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .join("_");
                Some(label)
            }
            Self::Unlabeled => None,
        }
    }
}

/// Turn per-sample labels into class ids.
///
/// A supplied class index is used as is and labels outside of it are an
/// error. Otherwise the index is discovered from the labels.
pub(crate) fn assign_classes(
    labels: &[Option<String>],
    supplied: Option<ClassIndex>,
) -> Result<(ClassIndex, Vec<Option<usize>>)> {
    let classes = match supplied {
        Some(classes) => classes,
        None => ClassIndex::from_labels(labels.iter().flatten()),
    };
    let ids: Vec<_> = labels
        .iter()
        .map(|label| label.as_deref().map(|label| classes.lookup(label)).transpose())
        .try_collect()?;
    Ok((classes, ids))
}

/// Read one file according to the load mode.
pub(crate) fn load_payload(bytes: Vec<u8>, load_mode: LoadMode) -> Result<Payload> {
    let payload = match load_mode {
        LoadMode::Bytes => Payload::Bytes(bytes),
        LoadMode::Decode => Payload::Image(image::load_from_memory(&bytes)?.to_rgb8()),
    };
    Ok(payload)
}

/// Apply the transform and resolve the label.
pub(crate) fn finish_sample(
    payload: Payload,
    class: Option<usize>,
    transform: Option<&Arc<dyn Transform>>,
) -> Result<(Payload, i64)> {
    let payload = match transform {
        Some(transform) => transform.apply(payload)?,
        None => payload,
    };
    let label = class.map(|class| class as i64).unwrap_or(0);
    Ok((payload, label))
}
