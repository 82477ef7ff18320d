use super::*;
use std::sync::atomic::AtomicUsize;

/// Write small RGB images at the given paths relative to `root`.
pub(crate) fn write_image_tree(root: &Path, files: &[&str]) -> Result<()> {
    files.iter().enumerate().try_for_each(|(nth, file)| -> Result<_> {
        let path = root.join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let image = RgbImage::from_pixel(4, 2, image::Rgb([nth as u8, 0, 255]));
        image.save(&path)?;
        Ok(())
    })
}

/// The in-memory dataset that counts loads.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct MemoryDataset {
    items: Arc<Vec<(ArrayD<u8>, i64)>>,
    classes: Arc<ClassIndex>,
    #[derivative(Debug = "ignore")]
    transform: Option<Arc<dyn Transform>>,
    pub loads: Arc<AtomicUsize>,
}

impl MemoryDataset {
    pub fn new(items: Vec<(ArrayD<u8>, i64)>) -> Self {
        let classes = ClassIndex::from_labels(items.iter().map(|(_, label)| label.to_string()));
        Self {
            items: Arc::new(items),
            classes: Arc::new(classes),
            transform: None,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Samples holding a `[3, 2, 2]` byte array filled with the sample index.
    pub fn arrays(len: usize) -> Self {
        Self::images(len, 2)
    }

    /// Samples holding a `[3, side, side]` byte array filled with the sample index.
    pub fn images(len: usize, side: usize) -> Self {
        let items = (0..len)
            .map(|index| {
                let array = ArrayD::from_elem(vec![3, side, side], index as u8);
                (array, (index % 3) as i64)
            })
            .collect();
        Self::new(items)
    }
}

impl Dataset for MemoryDataset {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Result<(Payload, i64)> {
        self.loads.fetch_add(1, atomic::Ordering::SeqCst);
        let (array, label) = self
            .items
            .get(index)
            .ok_or_else(|| format_err!("invalid index {}", index))?;
        let payload = Payload::Array(array.clone());
        let payload = match &self.transform {
            Some(transform) => transform.apply(payload)?,
            None => payload,
        };
        Ok((payload, *label))
    }

    fn locator_of(&self, index: usize) -> Result<String> {
        Ok(format!("memory/{}", index))
    }

    fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    fn set_transform(&mut self, transform: Option<Arc<dyn Transform>>) {
        self.transform = transform;
    }

    fn fork(&self) -> Box<dyn Dataset> {
        Box::new(Self {
            items: self.items.clone(),
            classes: self.classes.clone(),
            transform: self.transform.clone(),
            loads: self.loads.clone(),
        })
    }
}
