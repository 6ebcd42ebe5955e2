//! End-to-end demo: synthetic test card through a hue + blur chain.
//!
//! Usage: `cargo run --example filter_demo [config.json]`
//!
//! The optional JSON config overrides frame size, blur radius, hue
//! rotation, and output path.

use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use serde::Deserialize;

use framechain::{
    as_sink, FilterNode, FrameSize, FrameTime, GaussianBlurFilter, GpuContext, HueFilter,
    PipelineError, PixelSink, PixelSource, RenderStream,
};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DemoConfig {
    width: u32,
    height: u32,
    blur_radius: f32,
    hue_degrees: f32,
    output: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            blur_radius: 3.0,
            hue_degrees: 120.0,
            output: "filter_demo.png".into(),
        }
    }
}

/// Diagonal color ramp with a grid overlay, enough structure to see both
/// the hue rotation and the blur.
fn test_card(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let on_grid = x % 32 < 2 || y % 32 < 2;
            if on_grid {
                pixels.extend_from_slice(&[255, 255, 255, 255]);
            } else {
                let r = (x * 255 / width) as u8;
                let g = (y * 255 / height) as u8;
                pixels.extend_from_slice(&[r, g, 96, 255]);
            }
        }
    }
    pixels
}

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {path}"))?
        }
        None => DemoConfig::default(),
    };
    log::info!("demo config: {config:?}");

    let gpu = GpuContext::new_blocking().context("acquiring GPU context")?;
    log::info!("rendering on {}", gpu.adapter_info().name);
    let stream = RenderStream::new(Arc::new(gpu));

    let size = FrameSize::new(config.width, config.height);
    let pixels = test_card(config.width, config.height);
    let blur_radius = config.blur_radius;
    let hue_degrees = config.hue_degrees;

    let image = stream.run_sync(move |context| -> Result<_, PipelineError> {
        let mut source = PixelSource::from_pixels(context, &pixels, size)?;
        let hue = Arc::new(Mutex::new(HueFilter::new(context)?));
        hue.lock().unwrap().set_hue(hue_degrees);
        let blur = Arc::new(Mutex::new(GaussianBlurFilter::with_radius(
            context,
            blur_radius,
        )?));
        let sink = Arc::new(Mutex::new(PixelSink::new()));

        source.add_consumer(&as_sink(&hue))?;
        hue.lock().unwrap().add_consumer(&as_sink(&blur))?;
        blur.lock().unwrap().add_consumer(&as_sink(&sink))?;

        source.process_frame(FrameTime::from_seconds(0.0), context)?;
        let image = sink.lock().unwrap().latest_image(context);
        source.finish(context);
        Ok(image)
    })?;

    let image = image.context("no frame reached the sink")?;
    image
        .save(&config.output)
        .with_context(|| format!("writing {}", config.output))?;
    log::info!("wrote {}", config.output);
    Ok(())
}
