use crate::core::ncc::{Correlator, Peak};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Tunables of the multi-scale search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchParams {
    /// Sigma of the pre-correlation Gaussian blur (5-tap equivalent).
    pub blur_sigma: f32,
    /// Largest allowed `image / crop` integer ratio on either axis.
    pub max_size_ratio: u32,
    pub max_scale_steps: usize,
    pub shrink_factor: f64,
    /// Also correlate the crop at its own size, next to the scale ladder.
    pub native_scale: bool,
    /// Wall-clock budget for one `match_crop` call.
    pub timeout: Option<Duration>,
    /// Scratch memory shared by crop classes matched against one image at once.
    pub max_match_memory: usize,
}

/// 2 GiB of correlation scratch space.
pub const DEFAULT_MAX_MATCH_MEMORY: usize = 2 << 30;

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            max_size_ratio: 8,
            max_scale_steps: 20,
            shrink_factor: 0.86,
            native_scale: true,
            timeout: None,
            max_match_memory: DEFAULT_MAX_MATCH_MEMORY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top_left: (u32, u32),
    pub bottom_right: (u32, u32),
}

impl BoundingBox {
    pub fn as_array(&self) -> [u32; 4] {
        [
            self.top_left.0,
            self.top_left.1,
            self.bottom_right.0,
            self.bottom_right.1,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub score: f64,
    pub bbox: BoundingBox,
}

impl MatchResult {
    fn from_peak(peak: Peak, width: u32, height: u32) -> Self {
        Self {
            score: peak.score,
            bbox: BoundingBox {
                top_left: (peak.x, peak.y),
                bottom_right: (peak.x + width, peak.y + height),
            },
        }
    }
}

/// Outcome of offering one scale step to the [`ScoreWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Score improved on the last recorded one; keep shrinking.
    Continue,
    /// Score did not improve; the search has peaked.
    Peaked,
}

/// Trailing window of the scale search. Only the last recorded candidate is
/// kept; each offered step is compared against it.
///
/// A candidate is recorded only when it beats the recorded one *and* clears
/// the threshold. A step that fails to beat the recorded score ends the search.
#[derive(Debug, Clone, Default)]
pub struct ScoreWindow {
    best: Option<MatchResult>,
}

impl ScoreWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn best_score(&self) -> f64 {
        self.best.map_or(f64::NEG_INFINITY, |c| c.score)
    }

    pub fn offer(&mut self, candidate: MatchResult, threshold: f64) -> Step {
        if candidate.score <= self.best_score() {
            return Step::Peaked;
        }
        if candidate.score > threshold {
            self.best = Some(candidate);
        }
        Step::Continue
    }

    pub fn into_result(self, threshold: f64) -> Option<MatchResult> {
        self.best.filter(|c| c.score > threshold)
    }
}

/// Image side of a match: blurred once, correlated many times.
pub struct PreparedImage {
    correlator: Correlator,
}

impl PreparedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.correlator.dimensions()
    }

    pub fn match_scratch_bytes(&self) -> usize {
        self.correlator.match_scratch_bytes()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    params: MatchParams,
}

impl Matcher {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    pub fn prepare(&self, image: &RgbImage) -> PreparedImage {
        PreparedImage {
            correlator: Correlator::new(&self.blur(image)),
        }
    }

    fn blur(&self, image: &RgbImage) -> RgbImage {
        if self.params.blur_sigma > 0.0 {
            imageproc::filter::gaussian_blur_f32(image, self.params.blur_sigma)
        } else {
            image.clone()
        }
    }

    /// True when the image is more than `max_size_ratio` times the crop on
    /// either axis (integer ratio), or the crop is degenerate.
    pub fn exceeds_size_ratio(&self, image: (u32, u32), crop: (u32, u32)) -> bool {
        let (iw, ih) = image;
        let (w, h) = crop;
        let limit = self.params.max_size_ratio;
        w == 0 || h == 0 || ih / h > limit || iw / w > limit
    }

    /// Locate `crop` inside `image` across decreasing scales.
    ///
    /// Absent when the threshold is outside `[0, 1]`, the size ratio guard
    /// rejects the pair, or no scale scores above the threshold.
    pub fn match_crop(
        &self,
        image: &PreparedImage,
        crop: &RgbImage,
        threshold: f64,
    ) -> Option<MatchResult> {
        if !(0.0..=1.0).contains(&threshold) {
            return None;
        }

        let image_dims = image.dimensions();
        if self.exceeds_size_ratio(image_dims, crop.dimensions()) {
            return None;
        }

        let started = Instant::now();
        let crop = self.blur(crop);

        let native = if self.params.native_scale {
            image.correlator.best_match(&crop).map(|peak| {
                let candidate = MatchResult::from_peak(peak, crop.width(), crop.height());
                log::debug!("native scale scored {:.4}", candidate.score);
                candidate
            })
        } else {
            None
        }
        .filter(|c| c.score > threshold);

        let scaled = self.scale_search(image, &crop, threshold, started);

        match (native, scaled) {
            (Some(native), Some(scaled)) if scaled.score > native.score => Some(scaled),
            (Some(native), _) => Some(native),
            (None, scaled) => scaled,
        }
    }

    /// Aspect-anchored shrink ladder, independent of the native-scale pass.
    fn scale_search(
        &self,
        image: &PreparedImage,
        crop: &RgbImage,
        threshold: f64,
        started: Instant,
    ) -> Option<MatchResult> {
        let image_dims = image.dimensions();
        let mut window = ScoreWindow::new();
        let anchored = anchor_to_aspect(crop, image_dims);
        let (mut w, mut h) = anchored.dimensions();

        for step in 0..self.params.max_scale_steps {
            if self.exceeds_size_ratio(image_dims, (w, h)) {
                break;
            }
            if self.timed_out(started) {
                log::warn!(
                    "Match stopped after {:.2?} at scale step {}; keeping best so far",
                    started.elapsed(),
                    step
                );
                break;
            }

            let scaled = if (w, h) == anchored.dimensions() {
                anchored.clone()
            } else {
                imageops::resize(&anchored, w, h, FilterType::Triangle)
            };
            let Some(peak) = image.correlator.best_match(&scaled) else {
                break;
            };
            let candidate = MatchResult::from_peak(peak, w, h);
            log::debug!("scale step {} ({}x{}) scored {:.4}", step, w, h, candidate.score);

            if window.offer(candidate, threshold) == Step::Peaked {
                break;
            }

            w = (w as f64 * self.params.shrink_factor) as u32;
            h = (h as f64 * self.params.shrink_factor) as u32;
        }

        window.into_result(threshold)
    }

    fn timed_out(&self, started: Instant) -> bool {
        self.params
            .timeout
            .is_some_and(|limit| started.elapsed() >= limit)
    }
}

/// Rescale `crop` so it spans the image on the axis where the aspect ratios
/// make it fit, keeping the crop's own aspect ratio.
pub fn anchor_to_aspect(crop: &RgbImage, image: (u32, u32)) -> RgbImage {
    let (iw, ih) = (image.0 as u64, image.1 as u64);
    let (w, h) = (crop.width() as u64, crop.height() as u64);
    if w == 0 || h == 0 {
        return crop.clone();
    }
    let (new_w, new_h) = if iw * h > w * ih {
        (w * ih / h, ih)
    } else {
        (iw, h * iw / w)
    };
    let (new_w, new_h) = (new_w.max(1) as u32, new_h.max(1) as u32);
    if (new_w, new_h) == crop.dimensions() {
        return crop.clone();
    }
    imageops::resize(crop, new_w, new_h, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Deterministic blocky texture; blocks survive the blur well.
    fn blocks(width: u32, height: u32, seed: u32, block: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = ((x / block).wrapping_mul(73) ^ (y / block).wrapping_mul(151) ^ seed)
                .wrapping_mul(2654435761);
            Rgb([(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8])
        })
    }

    fn texture(width: u32, height: u32, seed: u32) -> RgbImage {
        blocks(width, height, seed, 4)
    }

    fn noise(width: u32, height: u32, seed: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(374761393) ^ y.wrapping_mul(668265263) ^ seed)
                .wrapping_mul(2246822519);
            Rgb([(v >> 24) as u8, (v >> 13) as u8, (v >> 5) as u8])
        })
    }

    fn scene_with_crop() -> (RgbImage, RgbImage) {
        let mut image = RgbImage::from_pixel(800, 600, Rgb([128, 128, 128]));
        let crop = texture(100, 80, 11);
        imageops::replace(&mut image, &crop, 50, 50);
        (image, crop)
    }

    fn candidate(score: f64) -> MatchResult {
        MatchResult {
            score,
            bbox: BoundingBox {
                top_left: (0, 0),
                bottom_right: (1, 1),
            },
        }
    }

    #[test]
    fn test_threshold_outside_unit_interval_is_absent() {
        let (image, crop) = scene_with_crop();
        let matcher = Matcher::default();
        let prepared = matcher.prepare(&image);

        assert!(matcher.match_crop(&prepared, &crop, -0.01).is_none());
        assert!(matcher.match_crop(&prepared, &crop, 1.01).is_none());
        assert!(matcher.match_crop(&prepared, &crop, f64::NAN).is_none());
    }

    #[test]
    fn test_size_ratio_guard() {
        let matcher = Matcher::default();
        assert!(!matcher.exceeds_size_ratio((800, 600), (100, 80)));
        assert!(matcher.exceeds_size_ratio((900, 600), (100, 80)));
        assert!(matcher.exceeds_size_ratio((800, 720), (100, 80)));
        assert!(matcher.exceeds_size_ratio((800, 600), (0, 80)));

        let image = texture(900, 100, 1);
        let prepared = matcher.prepare(&image);
        let crop = imageops::crop_imm(&image, 0, 0, 100, 100).to_image();
        assert!(matcher.match_crop(&prepared, &crop, 0.5).is_none());
    }

    #[test]
    fn test_exact_crop_located() {
        let (image, crop) = scene_with_crop();
        let matcher = Matcher::default();
        let prepared = matcher.prepare(&image);

        let result = matcher.match_crop(&prepared, &crop, 0.8).unwrap();

        assert_eq!(result.bbox.as_array(), [50, 50, 150, 130]);
        assert!(result.score >= 0.8, "score {}", result.score);
    }

    #[test]
    fn test_unrelated_noise_is_absent() {
        let (image, _) = scene_with_crop();
        let matcher = Matcher::default();
        let prepared = matcher.prepare(&image);

        assert!(matcher.match_crop(&prepared, &noise(100, 80, 5), 0.8).is_none());
    }

    #[test]
    fn test_matching_is_deterministic() {
        let (image, crop) = scene_with_crop();
        let matcher = Matcher::default();

        let first = matcher.match_crop(&matcher.prepare(&image), &crop, 0.8);
        let second = matcher.match_crop(&matcher.prepare(&image), &crop, 0.8);

        assert_eq!(first, second);
    }

    #[test]
    fn test_upscaled_crop_found_without_native_scale_pass() {
        let base = blocks(120, 90, 21, 15);
        let image = imageops::resize(&base, 240, 180, FilterType::Triangle);
        let matcher = Matcher::new(MatchParams {
            native_scale: false,
            ..MatchParams::default()
        });
        let prepared = matcher.prepare(&image);

        let result = matcher.match_crop(&prepared, &base, 0.6).unwrap();
        assert_eq!(result.bbox.top_left, (0, 0));
        assert_eq!(result.bbox.bottom_right, (240, 180));
    }

    /// 100x80 crop shown at twice its size in the image. The native-scale
    /// pass finds only a weak partial match there, so the scale search must
    /// still run and win.
    fn scene_with_upscaled_crop() -> (RgbImage, RgbImage) {
        let crop = blocks(100, 80, 7, 40);
        let enlarged = imageops::resize(&crop, 200, 160, FilterType::Triangle);
        let mut image = RgbImage::from_pixel(800, 600, Rgb([128, 128, 128]));
        imageops::replace(&mut image, &enlarged, 100, 100);
        (image, crop)
    }

    #[test]
    fn test_upscaled_crop_found_with_default_params() {
        let (image, crop) = scene_with_upscaled_crop();
        let matcher = Matcher::default();
        assert!(matcher.params().native_scale);
        let prepared = matcher.prepare(&image);

        for threshold in [0.3, 0.5] {
            let result = matcher.match_crop(&prepared, &crop, threshold).unwrap();
            let [x1, y1, x2, y2] = result.bbox.as_array();
            assert_eq!((x2 - x1, y2 - y1), (190, 152));
            assert!((100..=115).contains(&x1) && (100..=115).contains(&y1), "{x1},{y1}");
            assert!(result.score > 0.95, "score {}", result.score);
        }
    }

    #[test]
    fn test_native_scale_does_not_cut_scale_search_short() {
        let (image, crop) = scene_with_upscaled_crop();
        let prepared = Matcher::default().prepare(&image);

        let with_native = Matcher::default().match_crop(&prepared, &crop, 0.3);
        let scale_only = Matcher::new(MatchParams {
            native_scale: false,
            ..MatchParams::default()
        })
        .match_crop(&prepared, &crop, 0.3);

        assert_eq!(with_native, scale_only);
    }

    #[test]
    fn test_zero_timeout_keeps_native_scale_result() {
        let (image, crop) = scene_with_crop();
        let matcher = Matcher::new(MatchParams {
            timeout: Some(Duration::ZERO),
            ..MatchParams::default()
        });
        let prepared = matcher.prepare(&image);

        let result = matcher.match_crop(&prepared, &crop, 0.8).unwrap();
        assert_eq!(result.bbox.as_array(), [50, 50, 150, 130]);
    }

    #[test]
    fn test_anchor_to_aspect() {
        let crop = texture(100, 80, 0);
        // 800/600 > 100/80: height follows the image
        assert_eq!(anchor_to_aspect(&crop, (800, 600)).dimensions(), (750, 600));
        // 400/600 < 100/80: width follows the image
        assert_eq!(anchor_to_aspect(&crop, (400, 600)).dimensions(), (400, 320));
    }

    #[test]
    fn test_score_window_records_only_above_threshold() {
        let mut window = ScoreWindow::new();

        assert_eq!(window.offer(candidate(0.5), 0.8), Step::Continue);
        assert!(window.best.is_none());

        assert_eq!(window.offer(candidate(0.85), 0.8), Step::Continue);
        assert_eq!(window.best.unwrap().score, 0.85);
        assert_eq!(window.offer(candidate(0.9), 0.8), Step::Continue);
        assert_eq!(window.best.unwrap().score, 0.9);

        assert_eq!(window.offer(candidate(0.9), 0.8), Step::Peaked);
        assert_eq!(window.offer(candidate(0.7), 0.8), Step::Peaked);
        assert_eq!(window.into_result(0.8).unwrap().score, 0.9);
    }

    #[test]
    fn test_score_window_empty_result() {
        let mut window = ScoreWindow::new();
        window.offer(candidate(0.3), 0.8);
        assert!(window.into_result(0.8).is_none());
    }
}
