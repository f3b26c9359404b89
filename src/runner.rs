use crate::config::RunConfig;
use crate::core::association::{Associator, CropAssociation, FoundClasses};
use crate::core::dedup::UniqueCrops;
use crate::core::matcher::Matcher;
use crate::core::report::Report;
use crate::core::scanner::{display_name, list_images};
use crate::error::{CropMatchError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub crop_files: usize,
    pub unique_crops: usize,
    pub found_crops: usize,
    pub images_processed: usize,
    pub images_skipped: Vec<PathBuf>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub report: Report,
    pub summary: RunSummary,
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}

/// Scan, deduplicate, match and write the report described by `config`.
///
/// Nothing is written unless every step succeeds.
pub fn run(config: &RunConfig) -> Result<RunOutcome> {
    config.validate()?;
    let started = Instant::now();

    let image_paths = list_images(&config.images_dir)?;
    if image_paths.is_empty() {
        return Err(CropMatchError::config(format!(
            "Images directory incorrect: no images in {}",
            config.images_dir.display()
        )));
    }
    let crop_paths = list_images(&config.crops_dir)?;
    if crop_paths.is_empty() {
        return Err(CropMatchError::config(format!(
            "Crops directory incorrect: no crops in {}",
            config.crops_dir.display()
        )));
    }

    let crops = benchmark("hashing crops", || {
        if config.skip_unreadable {
            Ok(UniqueCrops::group_by_content_lenient(&crop_paths).0)
        } else {
            UniqueCrops::group_by_content(&crop_paths)
        }
    })?;
    if crops.is_empty() {
        return Err(CropMatchError::config(format!(
            "Crops directory incorrect: no readable crops in {}",
            config.crops_dir.display()
        )));
    }
    log::info!(
        "{} crop file(s) in {} unique class(es)",
        crops.file_count(),
        crops.len()
    );

    let batch = match config.max_images {
        Some(limit) => &image_paths[..limit.min(image_paths.len())],
        None => &image_paths[..],
    };

    let matcher = Matcher::new(config.match_params.clone());
    let associator = Associator::new(&crops, &matcher, config.threshold)
        .skip_unreadable(config.skip_unreadable);
    let found = FoundClasses::new();

    let (per_image, skipped) =
        benchmark("matching images", || match_batch(batch, &associator, &found, config))?;

    if found.is_empty() {
        log::info!("No crop class matched any of {} image(s)", batch.len());
    }
    let report = Report::assemble(per_image, &crops, &found);
    report.write(&config.output, config.format)?;

    let summary = RunSummary {
        crop_files: crops.file_count(),
        unique_crops: crops.len(),
        found_crops: found.len(),
        images_processed: batch.len() - skipped.len(),
        images_skipped: skipped,
        elapsed: started.elapsed(),
    };
    log::info!(
        "Found {}/{} crop class(es) across {} image(s)",
        summary.found_crops,
        summary.unique_crops,
        summary.images_processed
    );
    Ok(RunOutcome { report, summary })
}

type BatchResult = (Vec<(String, Vec<CropAssociation>)>, Vec<PathBuf>);

fn match_batch(
    batch: &[PathBuf],
    associator: &Associator<'_>,
    found: &FoundClasses,
    config: &RunConfig,
) -> Result<BatchResult> {
    let progress = ProgressBar::new(batch.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.green} {pos}/{len} {msg}") {
        progress.set_style(style);
    }

    let mut per_image = Vec::with_capacity(batch.len());
    let mut skipped = Vec::new();
    for path in batch {
        let name = display_name(path);
        progress.set_message(format!("Scanning matches for image {}", name));

        match associator.associate(path, found) {
            Ok(associations) => per_image.push((name, associations)),
            Err(err) if config.skip_unreadable && err.is_per_file() => {
                log::warn!("Skipping image {}: {}", path.display(), err);
                skipped.push(path.clone());
            }
            Err(err) => {
                progress.abandon();
                return Err(err);
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();
    Ok((per_image, skipped))
}
