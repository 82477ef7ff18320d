//! Sample locators and the ordered sample index.

use crate::{class_index::natural_cmp, common::*, error::DataError};

/// The image file extensions picked up by enumeration.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub(crate) fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

pub(crate) fn extension_list() -> Vec<String> {
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| format!(".{}", ext))
        .collect()
}

/// The backend specific identity of a sample.
pub trait Locator
where
    Self: Debug + Clone + Send + Sync,
{
    /// The string used for natural ordering and filename queries.
    fn display_name(&self) -> Cow<'_, str>;
}

impl Locator for PathBuf {
    fn display_name(&self) -> Cow<'_, str> {
        self.to_string_lossy()
    }
}

/// A member file inside a tar archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveMember {
    pub name: String,
    /// The byte offset of the member data in the archive file.
    pub offset: u64,
    pub size: u64,
}

impl Locator for ArchiveMember {
    fn display_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}

/// A line of a manifest list file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    pub line: String,
    /// The position of the originating list among the supplied lists.
    pub source: usize,
}

impl Locator for ManifestEntry {
    fn display_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.line)
    }
}

/// A sample locator with an optional class id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sample<L> {
    pub locator: L,
    pub class: Option<usize>,
}

/// The non-empty ordered list of samples of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex<L>
where
    L: Locator,
{
    samples: Vec<Sample<L>>,
}

impl<L> SampleIndex<L>
where
    L: Locator,
{
    /// Create an index, failing with [DataError::IndexEmpty] if no sample is given.
    ///
    /// * `root` - The searched location, reported on failure.
    /// * `sort` - Sort samples by the natural order of their locators.
    pub fn new(mut samples: Vec<Sample<L>>, root: impl AsRef<Path>, sort: bool) -> Result<Self> {
        if samples.is_empty() {
            return Err(DataError::IndexEmpty {
                root: root.as_ref().to_owned(),
                extensions: extension_list(),
            }
            .into());
        }

        if sort {
            samples.sort_by(|lhs, rhs| {
                natural_cmp(&lhs.locator.display_name(), &rhs.locator.display_name())
            });
        }

        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Sample<L>> {
        self.samples.get(index).ok_or_else(|| {
            DataError::IndexOutOfRange {
                index,
                len: self.samples.len(),
            }
            .into()
        })
    }

    pub fn samples(&self) -> &[Sample<L>] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_test() {
        assert!(has_image_extension(Path::new("a/b.JPG")));
        assert!(has_image_extension(Path::new("b.jpeg")));
        assert!(!has_image_extension(Path::new("b.gif")));
        assert!(!has_image_extension(Path::new("jpg")));
    }

    #[test]
    fn empty_index_test() {
        let err = SampleIndex::<PathBuf>::new(vec![], "/data/train", true).unwrap_err();
        match err.downcast_ref::<DataError>() {
            Some(DataError::IndexEmpty { root, extensions }) => {
                assert_eq!(root, Path::new("/data/train"));
                assert_eq!(extensions, &[".png", ".jpg", ".jpeg"]);
            }
            _ => panic!("unexpected error {:?}", err),
        }
        assert!(err.to_string().contains("/data/train"));
    }

    #[test]
    fn sorted_index_test() -> Result<()> {
        let samples: Vec<_> = ["b/10.png", "b/9.png", "a/1.png"]
            .iter()
            .map(|path| Sample {
                locator: PathBuf::from(path),
                class: None,
            })
            .collect();
        let index = SampleIndex::new(samples, "", true)?;
        let names: Vec<_> = index
            .samples()
            .iter()
            .map(|sample| sample.locator.display_name().into_owned())
            .collect();
        assert_eq!(names, ["a/1.png", "b/9.png", "b/10.png"]);
        assert!(index.get(3).is_err());
        Ok(())
    }
}
