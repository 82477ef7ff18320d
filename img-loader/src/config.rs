//! Dataset and loader configuration types.

use crate::{
    common::*,
    dataset::{Labeling, LoadMode},
    erasing::ErasingMode,
    prefetch::Precision,
};

pub const IMAGENET_DEFAULT_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_DEFAULT_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Dataset options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// The storage backend.
    pub kind: DatasetKind,
    /// A fixed class taxonomy. Classes are discovered if not set.
    #[serde(default)]
    pub class_map: Option<ClassMapSource>,
    #[serde(default)]
    pub load_mode: LoadMode,
}

/// Variants of storage backends and options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DatasetKind {
    /// An image directory tree.
    Folder {
        root: PathBuf,
        #[serde(default)]
        labeling: Labeling,
        #[serde(default = "default_true")]
        sort: bool,
    },
    /// A tar archive of images.
    Tar {
        path: PathBuf,
        #[serde(default)]
        labeling: Labeling,
    },
    /// Plain-text list files, one image per line.
    Manifest {
        lists: Vec<PathBuf>,
        root: Option<PathBuf>,
        /// Sort the lines in natural order instead of keeping the list order.
        #[serde(default)]
        sort: bool,
    },
}

impl DatasetKind {
    /// The directory that relative class map paths are resolved against.
    pub fn root(&self) -> &Path {
        match self {
            Self::Folder { root, .. } => root,
            Self::Tar { path, .. } => path.parent().unwrap_or_else(|| Path::new("")),
            Self::Manifest { root: Some(root), .. } => root,
            Self::Manifest { root: None, .. } => Path::new(""),
        }
    }
}

/// The source of a fixed class taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClassMapSource {
    /// A text file with one label per line.
    File(PathBuf),
    /// A comma-separated class list.
    List(String),
}

/// Loader options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub is_training: bool,
    /// Normalize and prefetch batches on the device.
    pub use_prefetcher: bool,
    pub num_workers: usize,
    /// The number of finished batches each worker may hold.
    pub prefetch_factor: usize,
    /// Replica options of distributed runs.
    pub distributed: Option<DistributedConfig>,
    /// Accepted for compatibility. Host memory is not pinned.
    pub pin_memory: bool,
    pub mean: [R64; 3],
    pub std: [R64; 3],
    pub precision: Precision,
    pub erasing: ErasingConfig,
    /// The number of augmented views per sample. Values below 2 disable splitting.
    pub num_aug_splits: usize,
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    /// The seed of shuffling samplers.
    pub seed: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            is_training: false,
            use_prefetcher: true,
            num_workers: 1,
            prefetch_factor: 2,
            distributed: None,
            pin_memory: false,
            mean: IMAGENET_DEFAULT_MEAN.map(r64),
            std: IMAGENET_DEFAULT_STD.map(r64),
            precision: Precision::Standard,
            erasing: ErasingConfig::default(),
            num_aug_splits: 0,
            device: Device::cuda_if_available(),
            seed: 0,
        }
    }
}

/// The replica this process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedConfig {
    pub num_replicas: usize,
    pub rank: usize,
}

/// Random erasing options of the prefetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErasingConfig {
    /// The probability to erase a sample. Zero disables erasing.
    pub prob: R64,
    pub mode: ErasingMode,
    /// The maximum number of rectangles per sample.
    pub count: usize,
    pub min_area: R64,
    pub max_area: R64,
    /// Leave the first augmentation split, or the first half of the batch, clean.
    pub split: bool,
}

impl Default for ErasingConfig {
    fn default() -> Self {
        Self {
            prob: r64(0.0),
            mode: ErasingMode::Const,
            count: 1,
            min_area: r64(0.02),
            max_area: r64(0.02),
            split: false,
        }
    }
}

impl ErasingConfig {
    /// The number of batch splits seen by erasing.
    pub fn num_splits(&self, num_aug_splits: usize) -> usize {
        match (self.split, num_aug_splits) {
            (false, _) => 0,
            (true, 0) => 2,
            (true, num_aug_splits) => num_aug_splits,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Load a configuration from a JSON5 file.
pub fn load_json5<T, P>(path: P) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    let config = json5::from_str(&text)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_test() -> Result<()> {
        let dataset: DatasetConfig = json5::from_str(
            r#"{
                kind: { type: "Folder", root: "/data/train" },
                class_map: { File: "classes.txt" },
            }"#,
        )?;
        assert!(matches!(
            dataset.kind,
            DatasetKind::Folder { sort: true, labeling: Labeling::LeafName, .. }
        ));
        assert_eq!(dataset.kind.root(), Path::new("/data/train"));
        assert_eq!(dataset.load_mode, LoadMode::Decode);

        let loader: LoaderConfig = json5::from_str(
            r#"{
                batch_size: 8,
                is_training: true,
                erasing: { prob: 0.25, split: true },
            }"#,
        )?;
        assert_eq!(loader.batch_size, 8);
        assert!(loader.use_prefetcher);
        assert_eq!(loader.mean[0], r64(0.485));
        assert_eq!(loader.erasing.count, 1);
        assert_eq!(loader.erasing.num_splits(loader.num_aug_splits), 2);
        assert_eq!(loader.erasing.num_splits(3), 3);
        Ok(())
    }

    #[test]
    fn load_json5_test() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dataset.json5");
        fs::write(
            &path,
            r#"{
                // tar archives resolve class maps next to the archive
                kind: { type: "Tar", path: "/data/val.tar" },
                class_map: { List: "cat,dog" },
                load_mode: "Bytes",
            }"#,
        )?;

        let config: DatasetConfig = load_json5(&path)?;
        assert_eq!(config.kind.root(), Path::new("/data"));
        assert_eq!(config.load_mode, LoadMode::Bytes);
        assert!(load_json5::<DatasetConfig, _>(dir.path().join("missing.json5")).is_err());
        Ok(())
    }

    #[test]
    fn manifest_sort_test() -> Result<()> {
        let unsorted: DatasetConfig = json5::from_str(
            r#"{ kind: { type: "Manifest", lists: ["cat.txt", "dog.txt"], root: "/data" } }"#,
        )?;
        assert!(matches!(unsorted.kind, DatasetKind::Manifest { sort: false, .. }));

        let sorted: DatasetConfig = json5::from_str(
            r#"{ kind: { type: "Manifest", lists: ["cat.txt"], sort: true } }"#,
        )?;
        assert!(matches!(
            sorted.kind,
            DatasetKind::Manifest { sort: true, root: None, .. }
        ));
        Ok(())
    }
}
