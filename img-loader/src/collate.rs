//! Packing samples into batches.

use crate::{common::*, error::DataError, payload::Payload};

/// A collated batch of images and integer labels.
#[derive(Debug, TensorLike)]
pub struct Batch {
    /// The `[rows, ...]` image tensor.
    pub images: Tensor,
    /// The `[rows]` int64 label tensor.
    pub targets: Tensor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.size()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The strategy that turns a list of samples into a batch.
pub trait Collate
where
    Self: Debug + Send + Sync,
{
    fn collate(&self, samples: Vec<(Payload, i64)>) -> Result<Batch>;

    /// The mixup switch if the collator mixes batches.
    fn mixup(&self) -> Option<&dyn MixupToggle> {
        None
    }
}

/// The enable switch of a batch-mixing collator.
pub trait MixupToggle
where
    Self: Send + Sync,
{
    fn mixup_enabled(&self) -> bool;

    fn set_mixup_enabled(&self, enabled: bool);
}

/// A shared mixup switch that mixing collators can embed.
#[derive(Debug)]
pub struct MixupFlag(AtomicBool);

impl MixupFlag {
    pub fn new(enabled: bool) -> Self {
        Self(AtomicBool::new(enabled))
    }
}

impl MixupToggle for MixupFlag {
    fn mixup_enabled(&self) -> bool {
        self.0.load(atomic::Ordering::SeqCst)
    }

    fn set_mixup_enabled(&self, enabled: bool) {
        self.0.store(enabled, atomic::Ordering::SeqCst);
    }
}

/// Samples flattened into batch rows.
///
/// Split views are placed slot-major, so view `k` of sample `i` is row
/// `i + k * num_samples`.
struct Rows {
    rows: Vec<Payload>,
    labels: Vec<i64>,
    shape: Vec<i64>,
}

fn arrange(samples: Vec<(Payload, i64)>) -> Result<Rows> {
    ensure!(!samples.is_empty(), "cannot collate an empty batch");
    let num_samples = samples.len();

    let arity = match &samples[0].0 {
        Payload::Split(views) => views.len(),
        _ => 1,
    };
    ensure!(arity > 0, "sample 0 has no split views");

    // views[k][i] is the k-th view of sample i
    let mut views: Vec<Vec<Payload>> = (0..arity)
        .map(|_| Vec::with_capacity(num_samples))
        .collect();
    let mut sample_labels = Vec::with_capacity(num_samples);

    for (position, (payload, label)) in samples.into_iter().enumerate() {
        let sample_views = match payload {
            Payload::Split(sample_views) => sample_views,
            other => vec![other],
        };
        if sample_views.len() != arity {
            return Err(DataError::SplitArityMismatch {
                position,
                expected: arity,
                found: sample_views.len(),
            }
            .into());
        }
        izip!(&mut views, sample_views).for_each(|(slot, view)| slot.push(view));
        sample_labels.push(label);
    }

    let rows: Vec<_> = views.into_iter().flatten().collect();
    let labels: Vec<_> = (0..arity)
        .flat_map(|_| sample_labels.iter().cloned())
        .collect();

    let mut shape = None;
    for (row, payload) in rows.iter().enumerate() {
        let position = row % num_samples;
        let found = match payload {
            Payload::Array(_) | Payload::Tensor(_) => payload.shape().unwrap_or_default(),
            other => {
                return Err(DataError::UnsupportedPayloadType {
                    position,
                    kind: other.kind_name(),
                }
                .into())
            }
        };
        match &shape {
            None => shape = Some(found),
            Some(expected) if expected != &found => {
                return Err(DataError::ShapeMismatch {
                    position,
                    expected: expected.clone(),
                    found,
                }
                .into())
            }
            Some(_) => {}
        }
    }

    Ok(Rows {
        rows,
        labels,
        shape: shape.unwrap_or_default(),
    })
}

fn array_to_tensor(array: &ArrayD<u8>) -> Tensor {
    let shape: Vec<i64> = array.shape().iter().map(|&dim| dim as i64).collect();
    let standard = array.as_standard_layout();
    let data: Vec<u8> = standard.iter().cloned().collect();
    Tensor::of_slice(&data).reshape(shape.as_slice())
}

/// The collator that writes byte images into one preallocated uint8 tensor.
///
/// Arrays are added into the zeroed rows. Tensors are copied into place and
/// cast to uint8.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastCollate;

impl Collate for FastCollate {
    fn collate(&self, samples: Vec<(Payload, i64)>) -> Result<Batch> {
        let Rows {
            rows,
            labels,
            shape,
        } = arrange(samples)?;

        let batch_shape: Vec<i64> = std::iter::once(rows.len() as i64)
            .chain(shape.iter().cloned())
            .collect();

        let images = tch::no_grad(|| -> Result<_> {
            let images = Tensor::zeros(batch_shape.as_slice(), (Kind::Uint8, Device::Cpu));
            for (index, payload) in rows.iter().enumerate() {
                let mut row = images.i(index as i64);
                match payload {
                    Payload::Array(array) => {
                        let _ = row.f_add_(&array_to_tensor(array))?;
                    }
                    Payload::Tensor(tensor) => {
                        row.f_copy_(tensor)?;
                    }
                    other => bail!("unexpected {} row", other.kind_name()),
                }
            }
            Ok(images)
        })?;
        let targets = Tensor::of_slice(&labels);

        Ok(Batch { images, targets })
    }
}

/// The collator that stacks rows of any element kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackCollate;

impl Collate for StackCollate {
    fn collate(&self, samples: Vec<(Payload, i64)>) -> Result<Batch> {
        let Rows { rows, labels, .. } = arrange(samples)?;

        let tensors: Vec<Tensor> = rows
            .into_iter()
            .map(|payload| match payload {
                Payload::Array(array) => Ok(array_to_tensor(&array)),
                Payload::Tensor(tensor) => Ok(tensor),
                other => Err(format_err!("unexpected {} row", other.kind_name())),
            })
            .try_collect()?;
        let images = Tensor::f_stack(&tensors, 0)?;
        let targets = Tensor::of_slice(&labels);

        Ok(Batch { images, targets })
    }
}
