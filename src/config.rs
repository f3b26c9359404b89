use crate::core::matcher::MatchParams;
use crate::error::{CropMatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_OUTPUT: &str = "dict_file.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Standard JSON.
    #[default]
    Json,
    /// Quoted keys with Python literal values, as written by the original tool.
    Legacy,
}

/// Everything one run needs, as handed over by the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub crops_dir: PathBuf,
    pub images_dir: PathBuf,
    pub threshold: f64,
    pub output: PathBuf,
    pub format: OutputFormat,
    /// Process at most this many images (in scan order).
    pub max_images: Option<usize>,
    /// Log and skip unreadable crops/images instead of aborting the run.
    pub skip_unreadable: bool,
    pub match_params: MatchParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            crops_dir: PathBuf::from("crops"),
            images_dir: PathBuf::from("images"),
            threshold: DEFAULT_THRESHOLD,
            output: PathBuf::from(DEFAULT_OUTPUT),
            format: OutputFormat::default(),
            max_images: None,
            skip_unreadable: false,
            match_params: MatchParams::default(),
        }
    }
}

impl RunConfig {
    /// Checks everything that can be checked before touching any file contents.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(CropMatchError::config(format!(
                "Threshold value should be between 0.0 and 1.0, got {}",
                self.threshold
            )));
        }
        if self.max_images == Some(0) {
            return Err(CropMatchError::config("max_images must be at least 1"));
        }
        for (label, dir) in [("Crops", &self.crops_dir), ("Images", &self.images_dir)] {
            if !dir.is_dir() {
                return Err(CropMatchError::config(format!(
                    "{} directory incorrect: {}",
                    label,
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}
