use super::*;
use crate::transform::TransformSpec;

/// The dataset wrapper that yields several augmented views of each sample.
///
/// The inner dataset runs the base stage, so each sample is decoded once per
/// access. The first view only goes through normalization. Each of the other
/// views runs the augmentation stage on its own copy.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct AugSplitDataset {
    dataset: Box<dyn Dataset>,
    #[derivative(Debug = "ignore")]
    augmentation: Arc<dyn Transform>,
    #[derivative(Debug = "ignore")]
    normalization: Arc<dyn Transform>,
    num_splits: usize,
}

impl AugSplitDataset {
    /// Wrap a dataset with a 3-stage transform and `num_splits` views per sample.
    pub fn new(
        mut dataset: Box<dyn Dataset>,
        transform: TransformSpec,
        num_splits: usize,
    ) -> Result<Self> {
        ensure!(num_splits >= 1, "num_splits must be positive");
        let (base, augmentation, normalization) = transform.into_stages()?;
        dataset.set_transform(Some(base));

        Ok(Self {
            dataset,
            augmentation,
            normalization,
            num_splits,
        })
    }

    pub fn num_splits(&self) -> usize {
        self.num_splits
    }

    pub fn inner(&self) -> &dyn Dataset {
        self.dataset.as_ref()
    }
}

impl Dataset for AugSplitDataset {
    fn len(&self) -> usize {
        self.dataset.len()
    }

    fn get(&self, index: usize) -> Result<(Payload, i64)> {
        let (base, label) = self.dataset.get(index)?;

        let augmented: Vec<_> = (1..self.num_splits)
            .map(|_| {
                let view = self.augmentation.apply(base.clone())?;
                self.normalization.apply(view)
            })
            .try_collect()?;
        let clean = self.normalization.apply(base)?;

        let views: Vec<_> = std::iter::once(clean).chain(augmented).collect();
        Ok((Payload::Split(views), label))
    }

    fn locator_of(&self, index: usize) -> Result<String> {
        self.dataset.locator_of(index)
    }

    fn classes(&self) -> &ClassIndex {
        self.dataset.classes()
    }

    /// Replace the base stage of the inner dataset.
    fn set_transform(&mut self, transform: Option<Arc<dyn Transform>>) {
        self.dataset.set_transform(transform);
    }

    fn fork(&self) -> Box<dyn Dataset> {
        Box::new(Self {
            dataset: self.dataset.fork(),
            augmentation: self.augmentation.clone(),
            normalization: self.normalization.clone(),
            num_splits: self.num_splits,
        })
    }
}
