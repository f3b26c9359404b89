use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cropmatch::config::{DEFAULT_OUTPUT, DEFAULT_THRESHOLD};
use cropmatch::{MatchParams, OutputFormat, RunConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "cropmatch",
    version,
    about = "Locate cropped sub-images inside a set of larger images"
)]
struct Cli {
    /// Directory holding the crops to look for
    #[arg(long, value_name = "DIR", default_value = "crops")]
    crops: PathBuf,

    /// Directory holding the images to search
    #[arg(long, value_name = "DIR", default_value = "images")]
    images: PathBuf,

    /// Minimum correlation score for a match, between 0.0 and 1.0
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f64,

    /// File to save the image → crops mapping to
    #[arg(long, value_name = "FILE", default_value = DEFAULT_OUTPUT)]
    dictfile: PathBuf,

    /// Output layout
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Only scan the first N images
    #[arg(long, value_name = "N")]
    max_images: Option<usize>,

    /// Log and skip unreadable crops or images instead of aborting
    #[arg(long)]
    skip_unreadable: bool,

    /// Give up refining a single match after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<f64>,

    /// Skip the extra 1:1 scale correlation next to the scale ladder
    #[arg(long)]
    no_native_scale: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Legacy,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => OutputFormat::Json,
            Format::Legacy => OutputFormat::Legacy,
        }
    }
}

impl Cli {
    fn into_config(self) -> Result<RunConfig> {
        let timeout = self
            .timeout_secs
            .map(Duration::try_from_secs_f64)
            .transpose()
            .context("Invalid --timeout-secs")?;

        Ok(RunConfig {
            crops_dir: self.crops,
            images_dir: self.images,
            threshold: self.threshold,
            output: self.dictfile,
            format: self.format.into(),
            max_images: self.max_images,
            skip_unreadable: self.skip_unreadable,
            match_params: MatchParams {
                native_scale: !self.no_native_scale,
                timeout,
                ..MatchParams::default()
            },
        })
    }
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let config = Cli::parse().into_config()?;

    println!("▶ File to save output: {}", config.output.display());
    println!("▶ Threshold given: {}", config.threshold);
    println!("\n---------------- Started scanning -----------------\n");

    let outcome = cropmatch::run(&config).context("Crop matching failed")?;
    let summary = &outcome.summary;

    println!(
        "⏱ Time taken to get matches: {:.2?} ({} image(s), {} skipped)",
        summary.elapsed,
        summary.images_processed,
        summary.images_skipped.len()
    );
    println!(
        "✨ {}/{} unique crop(s) found, {} crop file(s) total",
        summary.found_crops, summary.unique_crops, summary.crop_files
    );
    println!("\n----------------------------------------------------");
    println!("✅ Wrote mapping to \"{}\"", config.output.display());
    println!("----------------------------------------------------");

    Ok(())
}
