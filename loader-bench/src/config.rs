use anyhow::Result;
use img_loader::config::{DatasetConfig, LoaderConfig};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The benchmark configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    /// The square side length images are resized to.
    pub input_size: u32,
    pub epochs: usize,
    /// The probability of horizontal flips in augmented views.
    #[serde(default = "default_flip_prob")]
    pub flip_prob: f64,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

fn default_flip_prob() -> f64 {
    0.5
}
