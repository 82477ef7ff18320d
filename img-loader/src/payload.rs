use crate::common::*;

/// The data of one sample as it flows through transforms and collation.
#[derive(Debug)]
pub enum Payload {
    /// Undecoded file content.
    Bytes(Vec<u8>),
    /// A decoded 3-channel image.
    Image(RgbImage),
    /// A fixed-shape byte array, typically in CHW layout.
    Array(ArrayD<u8>),
    Tensor(Tensor),
    /// Differently augmented views of one sample.
    Split(Vec<Payload>),
}

impl Payload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Image(_) => "image",
            Self::Array(_) => "array",
            Self::Tensor(_) => "tensor",
            Self::Split(_) => "split",
        }
    }

    /// The shape of array or tensor payloads.
    pub fn shape(&self) -> Option<Vec<i64>> {
        match self {
            Self::Array(array) => Some(array.shape().iter().map(|&dim| dim as i64).collect()),
            Self::Tensor(tensor) => Some(tensor.size()),
            _ => None,
        }
    }
}

impl Clone for Payload {
    /// Tensors are deep copied so that in-place augmentation of a copy leaves
    /// the original intact.
    fn clone(&self) -> Self {
        match self {
            Self::Bytes(bytes) => Self::Bytes(bytes.clone()),
            Self::Image(image) => Self::Image(image.clone()),
            Self::Array(array) => Self::Array(array.clone()),
            Self::Tensor(tensor) => Self::Tensor(tensor.copy()),
            Self::Split(views) => Self::Split(views.clone()),
        }
    }
}
