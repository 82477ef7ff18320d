//! Random erasing of rectangles on normalized image batches.

use crate::common::*;

/// How erased pixels are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErasingMode {
    /// Zeros, i.e. the dataset mean after normalization.
    Const,
    /// One normal random color per rectangle.
    Rand,
    /// Normal random values per pixel.
    Pixel,
}

impl Default for ErasingMode {
    fn default() -> Self {
        Self::Const
    }
}

const MAX_ATTEMPTS: usize = 10;

/// The options of [RandomErasing].
#[derive(Debug, Clone)]
pub struct RandomErasingInit {
    /// The probability to erase each sample.
    pub probability: f64,
    pub mode: ErasingMode,
    /// The minimum fraction of the image area of all rectangles.
    pub min_area: f64,
    /// The maximum fraction of the image area of all rectangles.
    pub max_area: f64,
    /// The minimum aspect ratio. The maximum is its reciprocal.
    pub min_aspect: f64,
    pub min_count: usize,
    pub max_count: usize,
    /// The number of augmentation splits in the batch. The first split is left clean.
    pub num_splits: usize,
}

impl Default for RandomErasingInit {
    fn default() -> Self {
        Self {
            probability: 0.5,
            mode: ErasingMode::Const,
            min_area: 0.02,
            max_area: 1.0 / 3.0,
            min_aspect: 0.3,
            min_count: 1,
            max_count: 1,
            num_splits: 0,
        }
    }
}

impl RandomErasingInit {
    pub fn build(self) -> Result<RandomErasing> {
        let Self {
            probability,
            mode,
            min_area,
            max_area,
            min_aspect,
            min_count,
            max_count,
            num_splits,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&probability),
            "the erasing probability {} is not within [0, 1]",
            probability
        );
        ensure!(
            0.0 < min_area && min_area <= max_area && max_area <= 1.0,
            "invalid erasing area range [{}, {}]",
            min_area,
            max_area
        );
        ensure!(
            min_aspect > 0.0,
            "the minimum aspect ratio must be positive"
        );
        ensure!(
            min_count >= 1 && min_count <= max_count,
            "invalid erasing count range [{}, {}]",
            min_count,
            max_count
        );

        let log_aspect = {
            let lhs = min_aspect.ln();
            let rhs = (1.0 / min_aspect).ln();
            (lhs.min(rhs), lhs.max(rhs))
        };

        Ok(RandomErasing {
            probability,
            mode,
            min_area,
            max_area,
            log_aspect,
            min_count,
            max_count,
            num_splits,
        })
    }
}

/// Erase random rectangles of samples in a `[batch, channel, height, width]` tensor.
#[derive(Debug, Clone)]
pub struct RandomErasing {
    probability: f64,
    mode: ErasingMode,
    min_area: f64,
    max_area: f64,
    log_aspect: (f64, f64),
    min_count: usize,
    max_count: usize,
    num_splits: usize,
}

impl RandomErasing {
    pub fn mode(&self) -> ErasingMode {
        self.mode
    }

    /// Erase in place. Returns the number of erased rectangles.
    pub fn apply(&self, images: &Tensor) -> Result<usize> {
        let (batch_size, channels, height, width) = images.size4()?;
        let batch_start = if self.num_splits > 1 {
            batch_size / self.num_splits as i64
        } else {
            0
        };

        let mut rng = rand::thread_rng();
        let mut erased = 0;

        tch::no_grad(|| -> Result<_> {
            for index in batch_start..batch_size {
                let image = images.i(index);
                erased += self.erase(&mut rng, &image, channels, height, width)?;
            }
            Ok(())
        })?;

        Ok(erased)
    }

    fn erase(
        &self,
        rng: &mut impl Rng,
        image: &Tensor,
        channels: i64,
        height: i64,
        width: i64,
    ) -> Result<usize> {
        if rng.gen_range(0.0..1.0) >= self.probability {
            return Ok(0);
        }

        let area = (height * width) as f64;
        let count = rng.gen_range(self.min_count..=self.max_count);
        let mut erased = 0;

        for _ in 0..count {
            let placement = (0..MAX_ATTEMPTS).find_map(|_| {
                let target_area = rng.gen_range(self.min_area..=self.max_area) * area / count as f64;
                let aspect = rng.gen_range(self.log_aspect.0..=self.log_aspect.1).exp();
                let h = (target_area * aspect).sqrt().round() as i64;
                let w = (target_area / aspect).sqrt().round() as i64;
                (h > 0 && w > 0 && h < height && w < width).then(|| (h, w))
            });

            let (h, w) = match placement {
                Some(size) => size,
                None => continue,
            };
            let top = rng.gen_range(0..=(height - h));
            let left = rng.gen_range(0..=(width - w));

            let mut rect = image.narrow(1, top, h).narrow(2, left, w);
            let options = (image.kind(), image.device());
            let fill = match self.mode {
                ErasingMode::Const => Tensor::zeros(&[channels, 1, 1], options),
                ErasingMode::Rand => Tensor::randn(&[channels, 1, 1], options),
                ErasingMode::Pixel => Tensor::randn(&[channels, h, w], options),
            };
            rect.f_copy_(&fill)?;
            erased += 1;
        }

        Ok(erased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ones(batch_size: i64) -> Tensor {
        Tensor::ones(&[batch_size, 3, 32, 32], (Kind::Float, Device::Cpu))
    }

    fn erased_pixels(image: &Tensor) -> i64 {
        image.eq(0.0).to_kind(Kind::Int64).sum(Kind::Int64).int64_value(&[])
    }

    #[test]
    fn const_erasing_test() -> Result<()> {
        let erasing = RandomErasingInit {
            probability: 1.0,
            min_area: 0.1,
            max_area: 0.1,
            ..Default::default()
        }
        .build()?;

        let images = ones(4);
        let count = erasing.apply(&images)?;

        // a 0.1 area rectangle always fits in a 32x32 image
        assert_eq!(count, 4);
        for index in 0..4 {
            let pixels = erased_pixels(&images.i(index));
            assert!(pixels > 0 && pixels % 3 == 0);
            assert!(pixels <= 3 * 32 * 32 / 4);
        }
        Ok(())
    }

    #[test]
    fn clean_split_test() -> Result<()> {
        let erasing = RandomErasingInit {
            probability: 1.0,
            mode: ErasingMode::Pixel,
            num_splits: 2,
            ..Default::default()
        }
        .build()?;

        let images = ones(6);
        erasing.apply(&images)?;
        let untouched = images.narrow(0, 0, 3);
        assert_eq!(erased_pixels(&untouched), 0);
        assert_eq!(untouched.ne(1.0).to_kind(Kind::Int64).sum(Kind::Int64).int64_value(&[]), 0);
        Ok(())
    }

    #[test]
    fn rand_erasing_test() -> Result<()> {
        let erasing = RandomErasingInit {
            probability: 1.0,
            mode: ErasingMode::Rand,
            min_area: 0.1,
            max_area: 0.1,
            ..Default::default()
        }
        .build()?;

        let images = ones(2);
        assert_eq!(erasing.apply(&images)?, 2);

        // one random color per channel fills the whole rectangle
        for index in 0..2 {
            let image = images.i(index);
            let changed = image.ne(1.0);
            let counts: Vec<i64> = (0..3)
                .map(|channel| {
                    changed
                        .i(channel)
                        .to_kind(Kind::Int64)
                        .sum(Kind::Int64)
                        .int64_value(&[])
                })
                .collect();
            assert!(counts[0] > 0);
            assert!(counts.iter().all(|&count| count == counts[0]));

            for channel in 0..3 {
                let values = image.i(channel).masked_select(&changed.i(channel));
                let spread = (values.max() - values.min()).double_value(&[]);
                assert_abs_diff_eq!(spread, 0.0);
            }
        }
        Ok(())
    }

    #[test]
    fn disabled_erasing_test() -> Result<()> {
        let erasing = RandomErasingInit {
            probability: 0.0,
            ..Default::default()
        }
        .build()?;
        let images = ones(2);
        assert_eq!(erasing.apply(&images)?, 0);

        assert!(RandomErasingInit {
            min_area: 0.5,
            max_area: 0.1,
            ..Default::default()
        }
        .build()
        .is_err());
        Ok(())
    }
}
