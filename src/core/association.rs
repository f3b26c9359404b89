use crate::core::dedup::UniqueCrops;
use crate::core::hash::ContentHash;
use crate::core::matcher::{BoundingBox, Matcher, PreparedImage};
use crate::core::scanner::display_name;
use crate::error::{CropMatchError, Result};
use image::RgbImage;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One crop file placed in (or missing from) an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropAssociation {
    pub crop_name: String,
    pub bbox: Option<BoundingBox>,
}

impl CropAssociation {
    pub fn not_found(crop_name: String) -> Self {
        Self {
            crop_name,
            bbox: None,
        }
    }
}

/// Classes matched in at least one image so far. Shared across parallel
/// matches; marking is idempotent.
#[derive(Debug, Default)]
pub struct FoundClasses {
    inner: Mutex<HashSet<ContentHash>>,
}

impl FoundClasses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `hash` is marked.
    pub fn mark(&self, hash: &ContentHash) -> bool {
        let mut found = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        found.insert(hash.clone())
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        let found = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        found.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode any supported raster file into 8-bit RGB, dropping alpha.
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|source| CropMatchError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Runs every unique crop class against one image at a time.
pub struct Associator<'a> {
    crops: &'a UniqueCrops,
    matcher: &'a Matcher,
    threshold: f64,
    skip_unreadable: bool,
}

impl<'a> Associator<'a> {
    pub fn new(crops: &'a UniqueCrops, matcher: &'a Matcher, threshold: f64) -> Self {
        Self {
            crops,
            matcher,
            threshold,
            skip_unreadable: false,
        }
    }

    pub fn skip_unreadable(mut self, skip: bool) -> Self {
        self.skip_unreadable = skip;
        self
    }

    /// Load the image at `image_path` and associate every crop class with it.
    pub fn associate(
        &self,
        image_path: &Path,
        found: &FoundClasses,
    ) -> Result<Vec<CropAssociation>> {
        let image = load_rgb(image_path)?;
        self.associate_image(&image, found)
    }

    /// Entries are in class table order; a matched class contributes one entry
    /// per member file, all sharing the class's bounding box.
    ///
    /// Classes run in parallel only as far as `max_match_memory` allows for
    /// this image's correlation buffers.
    pub fn associate_image(
        &self,
        image: &RgbImage,
        found: &FoundClasses,
    ) -> Result<Vec<CropAssociation>> {
        let prepared = self.matcher.prepare(image);
        let classes: Vec<(&ContentHash, &[PathBuf])> = self.crops.iter().collect();
        let concurrency = match_concurrency(
            prepared.match_scratch_bytes(),
            self.matcher.params().max_match_memory,
            rayon::current_num_threads(),
        );
        log::debug!("Matching {} class(es), {} at a time", classes.len(), concurrency);

        let match_one = |&(hash, members): &(&ContentHash, &[PathBuf])| {
            self.match_class(&prepared, hash, members, found)
        };
        let sequential = || classes.iter().map(match_one).collect::<Vec<_>>();
        let per_class = if concurrency <= 1 {
            sequential()
        } else {
            match rayon::ThreadPoolBuilder::new().num_threads(concurrency).build() {
                Ok(pool) => {
                    pool.install(|| classes.par_iter().map(match_one).collect::<Vec<_>>())
                }
                Err(err) => {
                    log::warn!("Falling back to sequential matching: {}", err);
                    sequential()
                }
            }
        };

        let mut associations = Vec::new();
        for entries in per_class {
            associations.extend(entries?);
        }
        Ok(associations)
    }

    fn match_class(
        &self,
        prepared: &PreparedImage,
        hash: &ContentHash,
        members: &[PathBuf],
        found: &FoundClasses,
    ) -> Result<Vec<CropAssociation>> {
        let Some(representative) = self.crops.representative(hash) else {
            return Ok(Vec::new());
        };
        let crop = match load_rgb(representative) {
            Ok(crop) => crop,
            Err(err) if self.skip_unreadable && err.is_per_file() => {
                log::warn!("Skipping crop {}: {}", representative.display(), err);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let Some(result) = self.matcher.match_crop(prepared, &crop, self.threshold) else {
            return Ok(Vec::new());
        };

        found.mark(hash);
        log::info!(
            "Matched {} ({} file(s)) at {:?} with score {:.3}",
            display_name(representative),
            members.len(),
            result.bbox.as_array(),
            result.score
        );
        Ok(members
            .iter()
            .map(|path| CropAssociation {
                crop_name: display_name(path),
                bbox: Some(result.bbox),
            })
            .collect())
    }
}

/// How many classes may be matched against one image at once: as many as fit
/// `budget` bytes of scratch space, at least one, at most `threads`.
pub fn match_concurrency(scratch_bytes: usize, budget: usize, threads: usize) -> usize {
    let fit = budget.checked_div(scratch_bytes).unwrap_or(threads);
    fit.clamp(1, threads.max(1))
}
