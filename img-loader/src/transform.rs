//! Per-sample transform strategies.
//!
//! The decode/resize/augment chain is supplied by the caller. The strategies
//! here are the small set needed to turn files into collatable arrays.

use crate::{common::*, error::DataError, payload::Payload};

/// A transform applied to one sample.
pub trait Transform
where
    Self: Send + Sync,
{
    fn apply(&self, input: Payload) -> Result<Payload>;
}

impl<F> Transform for F
where
    F: Fn(Payload) -> Result<Payload> + Send + Sync,
{
    fn apply(&self, input: Payload) -> Result<Payload> {
        self(input)
    }
}

/// The transform handed to a dataset.
#[derive(Clone)]
pub enum TransformSpec {
    Single(Arc<dyn Transform>),
    /// The (base, augmentation, normalization) stages for augmentation splitting.
    Staged(Vec<Arc<dyn Transform>>),
}

impl Debug for TransformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(_) => write!(f, "Single"),
            Self::Staged(stages) => write!(f, "Staged({} stages)", stages.len()),
        }
    }
}

impl TransformSpec {
    pub fn single(transform: impl Transform + 'static) -> Self {
        Self::Single(Arc::new(transform))
    }

    pub fn staged(
        base: impl Transform + 'static,
        augmentation: impl Transform + 'static,
        normalization: impl Transform + 'static,
    ) -> Self {
        Self::Staged(vec![
            Arc::new(base),
            Arc::new(augmentation),
            Arc::new(normalization),
        ])
    }

    /// Split into the (base, augmentation, normalization) triple.
    pub fn into_stages(
        self,
    ) -> Result<(Arc<dyn Transform>, Arc<dyn Transform>, Arc<dyn Transform>)> {
        match self {
            Self::Staged(stages) if stages.len() == 3 => {
                let (base, augmentation, normalization) = stages
                    .into_iter()
                    .collect_tuple()
                    .ok_or(DataError::TransformShapeError { found: 3 })?;
                Ok((base, augmentation, normalization))
            }
            Self::Staged(stages) => Err(DataError::TransformShapeError {
                found: stages.len(),
            }
            .into()),
            Self::Single(_) => Err(DataError::TransformShapeError { found: 1 }.into()),
        }
    }

    /// Merge into one transform, running stages in sequence.
    pub fn into_composed(self) -> Arc<dyn Transform> {
        match self {
            Self::Single(transform) => transform,
            Self::Staged(stages) => Arc::new(Compose(stages)),
        }
    }
}

/// Run transforms in sequence.
pub struct Compose(pub Vec<Arc<dyn Transform>>);

impl Transform for Compose {
    fn apply(&self, input: Payload) -> Result<Payload> {
        self.0
            .iter()
            .try_fold(input, |payload, transform| transform.apply(payload))
    }
}

fn expect_image(input: Payload, name: &str) -> Result<RgbImage> {
    match input {
        Payload::Image(image) => Ok(image),
        other => bail!("{} expects an image, but get {}", name, other.kind_name()),
    }
}

/// Decode file bytes into an RGB image. Images pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeRgb;

impl Transform for DecodeRgb {
    fn apply(&self, input: Payload) -> Result<Payload> {
        match input {
            Payload::Bytes(bytes) => {
                let image = image::load_from_memory(&bytes)?.to_rgb8();
                Ok(Payload::Image(image))
            }
            Payload::Image(image) => Ok(Payload::Image(image)),
            other => bail!("cannot decode {} payload", other.kind_name()),
        }
    }
}

/// Resize an image to an exact size, ignoring the aspect ratio.
#[derive(Debug, Clone, Copy)]
pub struct ResizeExact {
    pub height: u32,
    pub width: u32,
    pub filter: FilterType,
}

impl ResizeExact {
    pub fn new(height: u32, width: u32) -> Self {
        Self {
            height,
            width,
            filter: FilterType::Triangle,
        }
    }
}

impl Transform for ResizeExact {
    fn apply(&self, input: Payload) -> Result<Payload> {
        let image = expect_image(input, "ResizeExact")?;
        if image.height() == self.height && image.width() == self.width {
            return Ok(Payload::Image(image));
        }
        let resized = image::imageops::resize(&image, self.width, self.height, self.filter);
        Ok(Payload::Image(resized))
    }
}

/// Mirror an image horizontally with the given probability.
#[derive(Debug, Clone, Copy)]
pub struct RandomHorizontalFlip {
    prob: f64,
}

impl RandomHorizontalFlip {
    pub fn new(prob: f64) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&prob),
            "the flip probability {} is not within [0, 1]",
            prob
        );
        Ok(Self { prob })
    }

    pub fn prob(&self) -> f64 {
        self.prob
    }
}

impl Transform for RandomHorizontalFlip {
    fn apply(&self, input: Payload) -> Result<Payload> {
        let image = expect_image(input, "RandomHorizontalFlip")?;
        let image = if rand::thread_rng().gen_bool(self.prob) {
            image::imageops::flip_horizontal(&image)
        } else {
            image
        };
        Ok(Payload::Image(image))
    }
}

/// Convert an image into a CHW byte array.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToArray;

impl Transform for ToArray {
    fn apply(&self, input: Payload) -> Result<Payload> {
        let image = expect_image(input, "ToArray")?;
        let (width, height) = image.dimensions();
        let hwc = Array3::from_shape_vec((height as usize, width as usize, 3), image.into_raw())?;
        let chw = hwc.permuted_axes([2, 0, 1]).as_standard_layout().into_owned();
        Ok(Payload::Array(chw.into_dyn()))
    }
}

/// Convert an image into a CHW float tensor with values in [0, 1].
#[derive(Debug, Clone, Copy, Default)]
pub struct ToTensor;

impl Transform for ToTensor {
    fn apply(&self, input: Payload) -> Result<Payload> {
        let image = expect_image(input, "ToTensor")?;
        let (width, height) = image.dimensions();
        let tensor = tch::no_grad(|| {
            Tensor::of_slice(image.as_raw())
                .view([height as i64, width as i64, 3])
                .permute(&[2, 0, 1])
                .to_kind(Kind::Float)
                / 255.0
        });
        Ok(Payload::Tensor(tensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_image() -> RgbImage {
        RgbImage::from_fn(4, 2, |x, y| image::Rgb([x as u8, y as u8, 7]))
    }

    #[test]
    fn to_array_layout_test() -> Result<()> {
        let payload = ToArray.apply(Payload::Image(checker_image()))?;
        let array = match payload {
            Payload::Array(array) => array,
            other => bail!("unexpected payload {}", other.kind_name()),
        };
        assert_eq!(array.shape(), &[3, 2, 4]);
        assert_eq!(array[[0, 1, 3]], 3);
        assert_eq!(array[[1, 1, 3]], 1);
        assert_eq!(array[[2, 0, 0]], 7);
        Ok(())
    }

    #[test]
    fn compose_test() -> Result<()> {
        let mut bytes = vec![];
        image::DynamicImage::ImageRgb8(checker_image())
            .write_to(&mut bytes, image::ImageOutputFormat::Png)?;

        let chain = Compose(vec![
            Arc::new(DecodeRgb),
            Arc::new(ResizeExact::new(3, 5)),
            Arc::new(ToArray),
        ]);
        let output = chain.apply(Payload::Bytes(bytes))?;
        assert_eq!(output.shape(), Some(vec![3, 3, 5]));
        Ok(())
    }

    #[test]
    fn stage_count_test() {
        let identity = |input: Payload| -> Result<Payload> { Ok(input) };
        let err = TransformSpec::Staged(vec![Arc::new(identity), Arc::new(identity)])
            .into_stages()
            .err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::TransformShapeError { found: 2 })
        ));
        assert!(TransformSpec::staged(identity, identity, identity)
            .into_stages()
            .is_ok());
    }

    #[test]
    fn flip_probability_test() -> Result<()> {
        assert!(RandomHorizontalFlip::new(1.5).is_err());
        assert!(RandomHorizontalFlip::new(-0.1).is_err());
        assert!(RandomHorizontalFlip::new(f64::NAN).is_err());

        let flip = RandomHorizontalFlip::new(1.0)?;
        let flipped = match flip.apply(Payload::Image(checker_image()))? {
            Payload::Image(image) => image,
            other => bail!("unexpected payload {}", other.kind_name()),
        };
        assert_eq!(flipped.get_pixel(0, 1).0, [3, 1, 7]);
        Ok(())
    }
}
