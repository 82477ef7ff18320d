use super::*;
use crate::sample::{ManifestEntry, Sample, SampleIndex};

/// The options to build a dataset from plain-text list files.
///
/// Each line of a list names one image. The position of the list among
/// `lists` is the label of its lines.
#[derive(Debug, Clone)]
pub struct ManifestDatasetInit {
    pub lists: Vec<PathBuf>,
    /// The directory that relative lines are resolved against.
    pub root: Option<PathBuf>,
    pub load_mode: LoadMode,
    /// Class names by group id. Defaults to the list file stems.
    pub class_index: Option<ClassIndex>,
    pub sort: bool,
}

impl ManifestDatasetInit {
    pub fn new<P>(lists: impl IntoIterator<Item = P>) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            lists: lists
                .into_iter()
                .map(|path| path.as_ref().to_owned())
                .collect(),
            root: None,
            load_mode: LoadMode::default(),
            class_index: None,
            sort: false,
        }
    }

    pub fn build(self) -> Result<ManifestDataset> {
        let Self {
            lists,
            root,
            load_mode,
            class_index,
            sort,
        } = self;

        ensure!(!lists.is_empty(), "at least one list file is required");

        let classes = match class_index {
            Some(classes) => {
                ensure!(
                    classes.len() >= lists.len(),
                    "the class index has {} classes, fewer than the {} list files",
                    classes.len(),
                    lists.len()
                );
                classes
            }
            None => {
                let stems: Vec<_> = lists
                    .iter()
                    .map(|path| -> Result<_> {
                        let stem = path
                            .file_stem()
                            .ok_or_else(|| {
                                format_err!("the list path '{}' has no file name", path.display())
                            })?
                            .to_string_lossy()
                            .into_owned();
                        Ok(stem)
                    })
                    .try_collect()?;
                ClassIndex::from_names(stems)?
            }
        };

        let mut samples = vec![];
        for (source, list) in lists.iter().enumerate() {
            if !list.is_file() {
                warn!("skip missing list file '{}'", list.display());
                continue;
            }

            let text = fs::read_to_string(list)
                .with_context(|| format!("failed to read list file '{}'", list.display()))?;
            let entries = text
                .lines()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty())
                .map(|line| Sample {
                    locator: ManifestEntry {
                        line: line.to_owned(),
                        source,
                    },
                    class: Some(source),
                });
            samples.extend(entries);
        }

        let search_root = root.clone().unwrap_or_else(|| lists[0].clone());
        let index = SampleIndex::new(samples, &search_root, sort)?;

        info!(
            "indexed {} images from {} list files",
            index.len(),
            lists.len()
        );

        Ok(ManifestDataset {
            root,
            load_mode,
            index: Arc::new(index),
            classes: Arc::new(classes),
            transform: None,
        })
    }
}

/// The dataset of images named by list files.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ManifestDataset {
    root: Option<PathBuf>,
    load_mode: LoadMode,
    index: Arc<SampleIndex<ManifestEntry>>,
    classes: Arc<ClassIndex>,
    #[derivative(Debug = "ignore")]
    transform: Option<Arc<dyn Transform>>,
}

impl ManifestDataset {
    pub fn index(&self) -> &SampleIndex<ManifestEntry> {
        &self.index
    }

    fn resolve(&self, entry: &ManifestEntry) -> PathBuf {
        match &self.root {
            Some(root) => root.join(&entry.line),
            None => PathBuf::from(&entry.line),
        }
    }
}

impl Dataset for ManifestDataset {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn get(&self, index: usize) -> Result<(Payload, i64)> {
        let Sample { locator, class } = self.index.get(index)?;
        let path = self.resolve(locator);
        let bytes = fs::read(&path)
            .with_context(|| format!("failed to read image file '{}'", path.display()))?;
        let payload = load_payload(bytes, self.load_mode)
            .with_context(|| format!("failed to decode image file '{}'", path.display()))?;
        finish_sample(payload, *class, self.transform.as_ref())
    }

    fn locator_of(&self, index: usize) -> Result<String> {
        Ok(self.index.get(index)?.locator.line.clone())
    }

    fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    fn set_transform(&mut self, transform: Option<Arc<dyn Transform>>) {
        self.transform = transform;
    }

    fn fork(&self) -> Box<dyn Dataset> {
        Box::new(Self {
            root: self.root.clone(),
            load_mode: self.load_mode,
            index: self.index.clone(),
            classes: self.classes.clone(),
            transform: self.transform.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataset::testing::write_image_tree, error::DataError};

    #[test]
    fn manifest_groups_test() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_image_tree(dir.path(), &["img/a.png", "img/b.png", "img/c.png"])?;

        let real = dir.path().join("real.txt");
        let fake = dir.path().join("fake.txt");
        fs::write(&real, "img/b.png\n\nimg/a.png\n")?;
        fs::write(&fake, "  img/c.png  \n")?;

        let dataset = ManifestDatasetInit {
            root: Some(dir.path().to_owned()),
            load_mode: LoadMode::Bytes,
            ..ManifestDatasetInit::new([&real, &dir.path().join("missing.txt"), &fake])
        }
        .build()?;

        assert_eq!(
            dataset.classes().iter().collect::<Vec<_>>(),
            ["real", "missing", "fake"]
        );
        assert_eq!(
            dataset.filenames(&[], false)?,
            ["img/b.png", "img/a.png", "img/c.png"]
        );

        let labels: Vec<_> = (0..dataset.len())
            .map(|index| -> Result<_> { Ok(dataset.get(index)?.1) })
            .try_collect()?;
        assert_eq!(labels, [0, 0, 2]);
        Ok(())
    }

    #[test]
    fn manifest_failure_test() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let empty = dir.path().join("empty.txt");
        fs::write(&empty, "\n\n")?;

        let err = ManifestDatasetInit::new([&empty]).build().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::IndexEmpty { .. })
        ));

        let list = dir.path().join("list.txt");
        fs::write(&list, "x.png\n")?;
        let result = ManifestDatasetInit {
            class_index: Some(ClassIndex::from_names(["only"])?),
            ..ManifestDatasetInit::new([&list, &empty])
        }
        .build();
        assert!(result.is_err());

        // the image itself is read at access time
        let dataset = ManifestDatasetInit::new([&list]).build()?;
        assert!(dataset.get(0).is_err());
        Ok(())
    }
}
