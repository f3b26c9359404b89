//! Locate previously cropped sub-images inside larger images.
//!
//! Crops are grouped by content hash, each unique crop is searched in every
//! image with multi-scale normalized cross-correlation, and the result is an
//! ordered mapping from image to the bounding boxes of the crops it contains.

pub mod config;
pub mod core;
pub mod error;
pub mod runner;

pub use config::{OutputFormat, RunConfig};
pub use crate::core::association::{Associator, CropAssociation, FoundClasses};
pub use crate::core::dedup::UniqueCrops;
pub use crate::core::matcher::{BoundingBox, MatchParams, MatchResult, Matcher};
pub use crate::core::report::{NOT_FOUND_KEY, Report};
pub use error::CropMatchError;
pub use runner::{RunOutcome, RunSummary, run};
