//! Class label to id assignment.

use crate::{common::*, error::DataError};

/// Compare two strings in natural order.
///
/// Digit runs are compared by their numeric value and the remaining text is
/// compared case-insensitively, so that `"class2"` sorts before `"class10"`.
/// Strings that only differ in case or leading zeros fall back to a plain
/// comparison to keep the order total.
pub fn natural_cmp(lhs: &str, rhs: &str) -> Ordering {
    let lhs_lower = lhs.to_lowercase();
    let rhs_lower = rhs.to_lowercase();
    let lhs_chunks = chunks(&lhs_lower);
    let rhs_chunks = chunks(&rhs_lower);

    lhs_chunks
        .iter()
        .zip(&rhs_chunks)
        .map(|(lhs, rhs)| lhs.cmp(rhs))
        .find(|ord| ord.is_ne())
        .unwrap_or_else(|| lhs_chunks.len().cmp(&rhs_chunks.len()))
        .then_with(|| lhs.cmp(rhs))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk<'a> {
    Num(&'a str),
    Text(&'a str),
}

impl<'a> Ord for Chunk<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        use Chunk::*;

        match (*self, *other) {
            (Num(lhs), Num(rhs)) => {
                let lhs = lhs.trim_start_matches('0');
                let rhs = rhs.trim_start_matches('0');
                lhs.len().cmp(&rhs.len()).then_with(|| lhs.cmp(rhs))
            }
            (Text(lhs), Text(rhs)) => lhs.cmp(rhs),
            (Num(_), Text(_)) => Ordering::Less,
            (Text(_), Num(_)) => Ordering::Greater,
        }
    }
}

impl<'a> PartialOrd for Chunk<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn chunks(text: &str) -> Vec<Chunk<'_>> {
    let mut output = vec![];
    let mut start = 0;
    let mut prev_digit = None;

    for (offset, ch) in text.char_indices() {
        let is_digit = ch.is_ascii_digit();
        if let Some(prev) = prev_digit {
            if prev != is_digit {
                output.push(make_chunk(&text[start..offset], prev));
                start = offset;
            }
        }
        prev_digit = Some(is_digit);
    }

    if let Some(prev) = prev_digit {
        output.push(make_chunk(&text[start..], prev));
    }

    output
}

fn make_chunk(text: &str, is_digit: bool) -> Chunk<'_> {
    if is_digit {
        Chunk::Num(text)
    } else {
        Chunk::Text(text)
    }
}

/// The dense, zero-based mapping from class labels to ids.
///
/// The id of a label is its position in the index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassIndex {
    classes: IndexSet<String>,
}

impl ClassIndex {
    /// Build the index from observed labels.
    ///
    /// Distinct labels are sorted in natural order and numbered by position,
    /// so the outcome only depends on the set of labels.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut distinct: Vec<String> = labels
            .into_iter()
            .map(|label| label.as_ref().to_owned())
            .unique()
            .collect();
        distinct.sort_by(|lhs, rhs| natural_cmp(lhs, rhs));

        Self {
            classes: distinct.into_iter().collect(),
        }
    }

    /// Build the index from names in id order.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let classes: IndexSet<String> = names.iter().cloned().collect();
        ensure!(
            classes.len() == names.len(),
            "duplicated class names found in {:?}",
            names
        );
        ensure!(!classes.is_empty(), "the class list must not be empty");
        Ok(Self { classes })
    }

    /// Parse a comma-separated class list, e.g. `"cat, dog,bird"`.
    pub fn from_class_list(text: &str) -> Result<Self> {
        Self::from_names(text.split(',').map(|name| name.trim().to_owned()))
    }

    /// Load a class map file with one label per line.
    ///
    /// The path is tried as given first and then relative to `root`. Only
    /// `.txt` files are supported.
    pub fn load(path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let resolved = if path.exists() {
            path.to_owned()
        } else {
            let joined = root.as_ref().join(path);
            if !joined.exists() {
                return Err(DataError::ClassMapMissing {
                    path: path.to_owned(),
                }
                .into());
            }
            joined
        };

        let is_txt = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("txt"))
            .unwrap_or(false);
        if !is_txt {
            return Err(DataError::UnsupportedFormat {
                path: path.to_owned(),
            }
            .into());
        }

        let content = fs::read_to_string(&resolved)
            .with_context(|| format!("failed to read class map '{}'", resolved.display()))?;
        let index = Self::from_names(content.lines().map(|line| line.trim().to_owned()))
            .with_context(|| format!("invalid class map '{}'", resolved.display()))?;
        info!(
            "loaded {} classes from '{}'",
            index.len(),
            resolved.display()
        );
        Ok(index)
    }

    pub fn id_of(&self, label: &str) -> Option<usize> {
        self.classes.get_index_of(label)
    }

    /// Get the id of a label, failing with [DataError::UnknownLabel] if absent.
    pub fn lookup(&self, label: &str) -> Result<usize> {
        self.id_of(label).ok_or_else(|| {
            DataError::UnknownLabel {
                label: label.to_owned(),
            }
            .into()
        })
    }

    pub fn label_of(&self, id: usize) -> Option<&str> {
        self.classes.get_index(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterate over labels in id order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(String::as_str)
    }
}
