mod config;
mod rate_counter;

use anyhow::{Context, Result};
use config::Config;
use img_loader::{
    create_loader, open_dataset,
    transform::{Compose, DecodeRgb, RandomHorizontalFlip, ResizeExact, ToArray, Transform},
    Dataset as _, TransformSpec,
};
use log::info;
use rate_counter::RateCounter;
use std::{env, path::PathBuf, sync::Arc, time::Instant};
use structopt::StructOpt;

#[derive(Debug, Clone, StructOpt)]
/// Measure the throughput of the image data loader.
struct Args {
    #[structopt(long, default_value = "loader-bench.json5")]
    /// configuration file
    pub config_file: PathBuf,
}

#[tokio::main]
pub async fn main() -> Result<()> {
    if env::var("RUST_LOG").is_err() {
        pretty_env_logger::formatted_builder()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        pretty_env_logger::init();
    }

    let Args { config_file } = Args::from_args();
    let Config {
        dataset: dataset_config,
        loader: loader_config,
        input_size,
        epochs,
        flip_prob,
    } = Config::open(&config_file)
        .with_context(|| format!("failed to load config file '{}'", config_file.display()))?;

    // load dataset
    info!("indexing dataset");
    let dataset = open_dataset(&dataset_config)?;
    info!(
        "found {} images in {} classes",
        dataset.len(),
        dataset.classes().len()
    );

    // build the per-sample transform
    let resize = move || -> Arc<dyn Transform> {
        Arc::new(Compose(vec![
            Arc::new(DecodeRgb),
            Arc::new(ResizeExact::new(input_size, input_size)),
        ]))
    };
    let flip = RandomHorizontalFlip::new(flip_prob).context("invalid flip_prob")?;
    let transform = if loader_config.num_aug_splits > 1 {
        TransformSpec::Staged(vec![resize(), Arc::new(flip), Arc::new(ToArray)])
    } else {
        TransformSpec::single(Compose(vec![resize(), Arc::new(flip), Arc::new(ToArray)]))
    };

    let loader = create_loader(dataset, Some(transform), None, &loader_config)?;
    let batch_size = loader_config.batch_size;

    for epoch in 0..epochs {
        let since = Instant::now();
        let mut rate_counter = RateCounter::with_second_interval();
        let mut iter = loader.epoch(epoch)?;
        let mut num_batches = 0;
        let mut num_images = 0;

        while let Some(batch) = iter.next().await {
            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    iter.close().await;
                    return Err(err.context(format!("epoch {} failed", epoch)));
                }
            };
            num_batches += 1;
            num_images += batch.len();

            rate_counter.add(1.0);
            if let Some(batch_rate) = rate_counter.rate() {
                info!(
                    "epoch: {}\tbatch: {}/{}\t{:.2} batches/s\t{:.2} images/s",
                    epoch,
                    num_batches,
                    loader.len(),
                    batch_rate,
                    batch_rate * batch_size as f64
                );
            }
        }

        let elapsed = since.elapsed().as_secs_f64();
        info!(
            "epoch {} done: {} batches, {} images in {:.2}s ({:.2} images/s)",
            epoch,
            num_batches,
            num_images,
            elapsed,
            num_images as f64 / elapsed
        );
    }

    Ok(())
}
