//! Failure kinds of indexing, collation and split augmentation.

use std::path::PathBuf;
use thiserror::Error;

/// The typed failures raised by this crate.
///
/// They are returned through [anyhow::Error], so callers can recover the kind
/// with `error.downcast_ref::<DataError>()` even after context is attached.
#[derive(Debug, Error)]
pub enum DataError {
    #[error(
        "found 0 samples in '{}', supported extensions are: {}",
        .root.display(),
        .extensions.join(",")
    )]
    IndexEmpty {
        root: PathBuf,
        extensions: Vec<String>,
    },
    #[error("cannot locate the class map file '{}'", .path.display())]
    ClassMapMissing { path: PathBuf },
    #[error("unsupported class map format '{}', only .txt is supported", .path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("the label '{label}' does not exist in the class map")]
    UnknownLabel { label: String },
    #[error("sample {position} has {found} splits, but {expected} splits are expected")]
    SplitArityMismatch {
        position: usize,
        expected: usize,
        found: usize,
    },
    #[error("unsupported payload type '{kind}' at sample {position}")]
    UnsupportedPayloadType { position: usize, kind: &'static str },
    #[error("sample {position} has shape {found:?}, but {expected:?} is expected")]
    ShapeMismatch {
        position: usize,
        expected: Vec<i64>,
        found: Vec<i64>,
    },
    #[error("expect exactly 3 transforms (base, augmentation, normalization), but get {found}")]
    TransformShapeError { found: usize },
    #[error("index {index} is out of range for {len} samples")]
    IndexOutOfRange { index: usize, len: usize },
}
