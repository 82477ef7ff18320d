use super::*;
use crate::sample::{has_image_extension, Sample, SampleIndex};

/// The options to index an image directory tree.
#[derive(Debug, Clone)]
pub struct FolderDatasetInit {
    pub root: PathBuf,
    pub load_mode: LoadMode,
    pub labeling: Labeling,
    /// A fixed class index. Labels outside of it fail the construction.
    pub class_index: Option<ClassIndex>,
    /// Sort samples by the natural order of their paths.
    pub sort: bool,
}

impl FolderDatasetInit {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_owned(),
            load_mode: LoadMode::default(),
            labeling: Labeling::default(),
            class_index: None,
            sort: true,
        }
    }

    pub fn build(self) -> Result<FolderDataset> {
        let Self {
            root,
            load_mode,
            labeling,
            class_index,
            sort,
        } = self;

        let pattern = {
            let root_str = root
                .to_str()
                .ok_or_else(|| format_err!("non-unicode root path '{}'", root.display()))?;
            format!("{}/**/*", glob::Pattern::escape(root_str))
        };

        let (paths, labels): (Vec<_>, Vec<_>) = glob::glob(&pattern)?
            .map(|entry| -> Result<_> { Ok(entry?) })
            .filter_ok(|path| path.is_file() && has_image_extension(path))
            .map_ok(|path| {
                let rel_dir = path
                    .parent()
                    .map(|parent| parent.strip_prefix(&root).unwrap_or(parent))
                    .unwrap_or_else(|| Path::new(""))
                    .to_owned();
                let label = labeling.label_of(&rel_dir);
                (path, label)
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();

        let (classes, ids) = assign_classes(&labels, class_index)?;
        let samples: Vec<_> = paths
            .into_iter()
            .zip(ids)
            .map(|(locator, class)| Sample { locator, class })
            .collect();
        let index = SampleIndex::new(samples, &root, sort)?;

        info!(
            "indexed {} images in {} classes under '{}'",
            index.len(),
            classes.len(),
            root.display()
        );

        Ok(FolderDataset {
            root,
            load_mode,
            index: Arc::new(index),
            classes: Arc::new(classes),
            transform: None,
        })
    }
}

/// The dataset of image files in a directory tree.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FolderDataset {
    root: PathBuf,
    load_mode: LoadMode,
    index: Arc<SampleIndex<PathBuf>>,
    classes: Arc<ClassIndex>,
    #[derivative(Debug = "ignore")]
    transform: Option<Arc<dyn Transform>>,
}

impl FolderDataset {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &SampleIndex<PathBuf> {
        &self.index
    }
}

impl Dataset for FolderDataset {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn get(&self, index: usize) -> Result<(Payload, i64)> {
        let Sample { locator, class } = self.index.get(index)?;
        let bytes = fs::read(locator)
            .with_context(|| format!("failed to read image file '{}'", locator.display()))?;
        let payload = load_payload(bytes, self.load_mode)
            .with_context(|| format!("failed to decode image file '{}'", locator.display()))?;
        finish_sample(payload, *class, self.transform.as_ref())
    }

    fn locator_of(&self, index: usize) -> Result<String> {
        Ok(self.index.get(index)?.locator.display().to_string())
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
    fn folder_index_test() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_image_tree(
            dir.path(),
            &[
                "class10/b.png",
                "class2/a.png",
                "class2/img10.png",
                "class2/img9.png",
                "class1/c.png",
            ],
        )?;
        fs::write(dir.path().join("class1/notes.txt"), "not an image")?;

        let dataset = FolderDatasetInit::new(dir.path()).build()?;
        assert_eq!(dataset.len(), 5);
        assert_eq!(
            dataset.classes().iter().collect::<Vec<_>>(),
            ["class1", "class2", "class10"]
        );

        let names = dataset.filenames(&[], true)?;
        assert_eq!(names, ["c.png", "a.png", "img9.png", "img10.png", "b.png"]);

        let (payload, label) = dataset.get(3)?;
        assert_eq!(label, 1);
        assert!(matches!(payload, Payload::Image(ref image) if image.dimensions() == (4, 2)));
        Ok(())
    }

    #[test]
    fn deterministic_index_test() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_image_tree(dir.path(), &["z/1.png", "a/2.jpg", "m/3.jpeg", "a/10.png"])?;

        let lhs = FolderDatasetInit::new(dir.path()).build()?;
        let rhs = FolderDatasetInit::new(dir.path()).build()?;
        assert_eq!(lhs.classes(), rhs.classes());
        assert_eq!(lhs.index(), rhs.index());
        Ok(())
    }

    #[test]
    fn empty_folder_test() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("cat"))?;
        fs::write(dir.path().join("cat/readme.md"), "nothing")?;

        let err = FolderDatasetInit::new(dir.path()).build().unwrap_err();
        match err.downcast_ref::<DataError>() {
            Some(DataError::IndexEmpty { root, .. }) => assert_eq!(root, dir.path()),
            _ => panic!("unexpected error {:?}", err),
        }
        Ok(())
    }

    #[test]
    fn labeling_and_fixed_classes_test() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_image_tree(dir.path(), &["train/cat/1.png", "root.png"])?;

        let flattened = FolderDatasetInit {
            labeling: Labeling::FlattenedPath,
            ..FolderDatasetInit::new(dir.path())
        }
        .build()?;
        assert_eq!(
            flattened.classes().iter().collect::<Vec<_>>(),
            ["", "train_cat"]
        );

        let unlabeled = FolderDatasetInit {
            labeling: Labeling::Unlabeled,
            load_mode: LoadMode::Bytes,
            ..FolderDatasetInit::new(dir.path())
        }
        .build()?;
        assert!(unlabeled.classes().is_empty());
        let (payload, label) = unlabeled.get(0)?;
        assert_eq!(label, 0);
        assert!(matches!(payload, Payload::Bytes(_)));

        let err = FolderDatasetInit {
            class_index: Some(ClassIndex::from_names(["dog"])?),
            ..FolderDatasetInit::new(dir.path())
        }
        .build()
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::UnknownLabel { .. })
        ));
        Ok(())
    }
}
