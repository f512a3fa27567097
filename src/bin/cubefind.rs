//! Operator-facing CLI (component L): loads a parameter file, runs the
//! pipeline, writes the mask cube back out, and prints a summary line per
//! surviving source. Deliberately thin — it is not a catalogue writer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use cubefind::params::Params;
use cubefind::pipeline;

#[derive(Parser)]
#[command(name = "cubefind", about = "Smooth + Clip source finder for 3-D spectral-line cubes")]
struct Args {
    /// JSON parameter file describing the run (input/output paths, finder
    /// and linker settings).
    params: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let text = std::fs::read_to_string(&args.params)
        .with_context(|| format!("reading parameter file {}", args.params.display()))?;
    let params: Params = serde_json::from_str(&text)
        .with_context(|| format!("parsing parameter file {}", args.params.display()))?;

    let (mask, catalog) = pipeline::run(&params).context("running source-finding pipeline")?;

    mask.save(&params.output_path, params.overwrite)
        .with_context(|| format!("writing mask cube to {}", params.output_path))?;

    if catalog.sources.is_empty() {
        tracing::info!("no sources survived linking");
    }
    for source in &catalog.sources {
        tracing::info!(
            label = source.label,
            bbox = ?source.bbox,
            n_pixels = source.n_pixels,
            "source"
        );
    }

    Ok(())
}
