use super::*;
use crate::sample::{has_image_extension, ArchiveMember, Sample, SampleIndex};

/// The options to index the image members of a tar archive.
#[derive(Debug, Clone)]
pub struct TarDatasetInit {
    pub path: PathBuf,
    pub load_mode: LoadMode,
    pub labeling: Labeling,
    pub class_index: Option<ClassIndex>,
}

impl TarDatasetInit {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            load_mode: LoadMode::default(),
            labeling: Labeling::default(),
            class_index: None,
        }
    }

    /// List the archive once and record member offsets.
    ///
    /// The archive is closed afterwards. Each worker reopens it on its first access.
    pub fn build(self) -> Result<TarDataset> {
        let Self {
            path,
            load_mode,
            labeling,
            class_index,
        } = self;

        ensure!(
            path.is_file(),
            "the archive '{}' is not a file",
            path.display()
        );

        let (members, labels): (Vec<_>, Vec<_>) = {
            let file = File::open(&path)
                .with_context(|| format!("failed to open archive '{}'", path.display()))?;
            let mut archive = ::tar::Archive::new(file);
            let mut pairs = vec![];

            for entry in archive.entries()? {
                let entry = entry?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }

                let name = entry.path()?.to_string_lossy().into_owned();
                let member_path = Path::new(&name);
                if !has_image_extension(member_path) {
                    continue;
                }

                let rel_dir = member_path.parent().unwrap_or_else(|| Path::new(""));
                let label = labeling.label_of(rel_dir);
                let member = ArchiveMember {
                    offset: entry.raw_file_position(),
                    size: entry.size(),
                    name,
                };
                pairs.push((member, label));
            }

            pairs.into_iter().unzip()
        };

        let (classes, ids) = assign_classes(&labels, class_index)?;
        let samples: Vec<_> = members
            .into_iter()
            .zip(ids)
            .map(|(locator, class)| Sample { locator, class })
            .collect();
        let index = SampleIndex::new(samples, &path, true)?;

        info!(
            "indexed {} images in {} classes in archive '{}'",
            index.len(),
            classes.len(),
            path.display()
        );

        Ok(TarDataset {
            path,
            load_mode,
            index: Arc::new(index),
            classes: Arc::new(classes),
            transform: None,
            handle: OnceCell::new(),
        })
    }
}

/// The dataset of image members in a tar archive.
///
/// The file handle is opened lazily and belongs to this instance only.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TarDataset {
    path: PathBuf,
    load_mode: LoadMode,
    index: Arc<SampleIndex<ArchiveMember>>,
    classes: Arc<ClassIndex>,
    #[derivative(Debug = "ignore")]
    transform: Option<Arc<dyn Transform>>,
    handle: OnceCell<File>,
}

impl TarDataset {
    pub fn index(&self) -> &SampleIndex<ArchiveMember> {
        &self.index
    }

    pub fn is_open(&self) -> bool {
        self.handle.get().is_some()
    }

    fn read_member(&self, member: &ArchiveMember) -> Result<Vec<u8>> {
        let mut file: &File = self.handle.get_or_try_init(|| {
            debug!("open archive '{}'", self.path.display());
            File::open(&self.path)
                .with_context(|| format!("failed to open archive '{}'", self.path.display()))
        })?;

        let mut bytes = vec![0; member.size as usize];
        file.seek(SeekFrom::Start(member.offset))?;
        file.read_exact(&mut bytes).with_context(|| {
            format!(
                "failed to read member '{}' of archive '{}'",
                member.name,
                self.path.display()
            )
        })?;
        Ok(bytes)
    }
}

impl Dataset for TarDataset {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn get(&self, index: usize) -> Result<(Payload, i64)> {
        let Sample { locator, class } = self.index.get(index)?;
        let bytes = self.read_member(locator)?;
        let payload = load_payload(bytes, self.load_mode)
            .with_context(|| format!("failed to decode archive member '{}'", locator.name))?;
        finish_sample(payload, *class, self.transform.as_ref())
    }

    fn locator_of(&self, index: usize) -> Result<String> {
        Ok(self.index.get(index)?.locator.name.clone())
    }

    fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    fn set_transform(&mut self, transform: Option<Arc<dyn Transform>>) {
        self.transform = transform;
    }

    fn fork(&self) -> Box<dyn Dataset> {
        Box::new(Self {
            path: self.path.clone(),
            load_mode: self.load_mode,
            index: self.index.clone(),
            classes: self.classes.clone(),
            transform: self.transform.clone(),
            handle: OnceCell::new(),
        })
    }
}
