use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use tryon_mirror::{
    TryOnConfig,
    pipeline::{
        Compositor, DefaultFetcher, PoseModelAdapter, asset::fetch_and_decode, model_from_config,
    },
    types::Frame,
};

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let input_image = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demo/person.jpg"));
    let output_image = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demo/tryon.png"));

    let config = TryOnConfig::load();
    let garment_url = args.next().unwrap_or_else(|| config.product.image.clone());

    let photo = image::open(&input_image)
        .with_context(|| format!("failed to open image {}", input_image.display()))?
        .to_rgba8();
    let (width, height) = photo.dimensions();
    let frame = Frame {
        rgba: photo.into_raw(),
        width,
        height,
        timestamp: Instant::now(),
    };

    let fetcher = DefaultFetcher::new()?;
    let garment = Arc::new(fetch_and_decode(&fetcher, &garment_url)?);

    let mut adapter = PoseModelAdapter::new(model_from_config(&config.pose));
    adapter.initialize()?;
    println!(
        "Running {} pose model on {} ({}x{})",
        adapter.label(),
        input_image.display(),
        width,
        height
    );
    let pose = adapter.infer(&frame, 0)?;
    match &pose {
        Some(pose) => println!("Detected {} landmarks", pose.landmarks.len()),
        None => println!("No body detected; writing background only"),
    }

    let mut compositor = Compositor::new(config.overlay.clone());
    compositor.resize(width, height);
    let report = compositor.compose(&frame, pose.as_ref(), Some(&garment));
    if let Some(placement) = report.garment {
        println!(
            "Garment placed at ({:.0}, {:.0}) size {:.0}x{:.0}",
            placement.left, placement.top, placement.width, placement.height
        );
    }

    let surface = compositor.surface();
    let output = RgbaImage::from_raw(surface.width(), surface.height(), surface.rgba().to_vec())
        .ok_or_else(|| anyhow!("composited surface has an unexpected size"))?;
    output
        .save(&output_image)
        .with_context(|| format!("failed to save {}", output_image.display()))?;

    println!("Wrote {}", output_image.display());
    Ok(())
}
