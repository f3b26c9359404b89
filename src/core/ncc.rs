//! Zero-mean normalized cross-correlation (`TM_CCOEFF_NORMED` style) over RGB.
//!
//! The numerator is computed in the frequency domain: the image is flattened
//! row-major with its own width as stride and correlated against the
//! zero-mean template laid out with the same stride. Every valid top-left
//! offset `y * width + x` then reads the plain window sum without wrap-around.
//! The per-window image energy comes from integral images.
//!
//! Based on J.P. Lewis, "Fast Normalized Cross-Correlation".

use image::RgbImage;
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

const CHANNELS: usize = 3;

/// Best correlation peak of one template placement search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub score: f64,
    pub x: u32,
    pub y: u32,
}

/// Summed-area table with a zero top row and left column.
#[derive(Debug, Clone)]
struct Integral {
    stride: usize,
    data: Vec<u64>,
}

impl Integral {
    fn build(plane: &[u8], width: usize, height: usize, square: bool) -> Self {
        let stride = width + 1;
        let mut data = vec![0u64; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0u64;
            for x in 0..width {
                let v = plane[y * width + x] as u64;
                row_sum += if square { v * v } else { v };
                data[(y + 1) * stride + x + 1] = data[y * stride + x + 1] + row_sum;
            }
        }
        Self { stride, data }
    }

    fn region(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let s = self.stride;
        let a = self.data[y * s + x];
        let b = self.data[y * s + x + w];
        let c = self.data[(y + h) * s + x];
        let d = self.data[(y + h) * s + x + w];
        d + a - b - c
    }
}

fn split_channels(image: &RgbImage) -> [Vec<u8>; CHANNELS] {
    let len = image.width() as usize * image.height() as usize;
    let mut planes: [Vec<u8>; CHANNELS] = std::array::from_fn(|_| Vec::with_capacity(len));
    for pixel in image.pixels() {
        for (c, plane) in planes.iter_mut().enumerate() {
            plane.push(pixel[c]);
        }
    }
    planes
}

/// Precomputed image side of the correlation. Built once per image and reused
/// for every template and every scale.
pub struct Correlator {
    width: usize,
    height: usize,
    fft_len: usize,
    spectra: [Vec<Complex<f64>>; CHANNELS],
    sums: [Integral; CHANNELS],
    square_sums: [Integral; CHANNELS],
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl Correlator {
    pub fn new(image: &RgbImage) -> Self {
        let width = image.width() as usize;
        let height = image.height() as usize;
        let fft_len = (width * height).max(1).next_power_of_two();

        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);

        let planes = split_channels(image);
        let sums = std::array::from_fn(|c| Integral::build(&planes[c], width, height, false));
        let square_sums =
            std::array::from_fn(|c| Integral::build(&planes[c], width, height, true));
        let spectra = std::array::from_fn(|c| {
            let mut buffer = vec![Complex::new(0.0, 0.0); fft_len];
            for (slot, &v) in buffer.iter_mut().zip(planes[c].iter()) {
                slot.re = v as f64;
            }
            forward.process(&mut buffer);
            buffer
        });

        Self {
            width,
            height,
            fft_len,
            spectra,
            sums,
            square_sums,
            forward,
            inverse,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }

    /// Heap bytes one `best_match` call allocates on top of the stored spectra.
    pub fn match_scratch_bytes(&self) -> usize {
        2 * self.fft_len * std::mem::size_of::<Complex<f64>>()
    }

    /// Highest-scoring placement of `template`, first in row-major order on ties.
    ///
    /// `None` when the template does not fit inside the image, is empty, or
    /// has no variance (a flat template correlates with nothing).
    pub fn best_match(&self, template: &RgbImage) -> Option<Peak> {
        let tw = template.width() as usize;
        let th = template.height() as usize;
        if tw == 0 || th == 0 || tw > self.width || th > self.height {
            return None;
        }

        let area = (tw * th) as u64;
        let planes = split_channels(template);
        let mut template_energy = 0.0f64;
        let mut product = vec![Complex::new(0.0, 0.0); self.fft_len];
        let mut buffer = vec![Complex::new(0.0, 0.0); self.fft_len];

        for (c, plane) in planes.iter().enumerate() {
            let sum: u64 = plane.iter().map(|&v| v as u64).sum();
            let mean = sum as f64 / area as f64;

            if c > 0 {
                buffer.fill(Complex::new(0.0, 0.0));
            }
            for ty in 0..th {
                for tx in 0..tw {
                    let centered = plane[ty * tw + tx] as f64 - mean;
                    template_energy += centered * centered;
                    buffer[ty * self.width + tx].re = centered;
                }
            }
            self.forward.process(&mut buffer);

            for ((acc, img), tmpl) in product
                .iter_mut()
                .zip(self.spectra[c].iter())
                .zip(buffer.iter())
            {
                *acc += img * tmpl.conj();
            }
        }

        if template_energy <= f64::EPSILON {
            return None;
        }
        self.inverse.process(&mut product);

        let template_norm = template_energy.sqrt();
        let scale = 1.0 / self.fft_len as f64;
        let rows = self.height - th + 1;
        let cols = self.width - tw + 1;

        let row_best: Vec<Option<(f64, usize)>> = (0..rows)
            .into_par_iter()
            .map(|y| {
                let mut best: Option<(f64, usize)> = None;
                for x in 0..cols {
                    let numerator = product[y * self.width + x].re * scale;
                    let window_energy = self.window_energy(x, y, tw, th, area);
                    let score = normalize(numerator, window_energy.sqrt() * template_norm);
                    if best.is_none_or(|(s, _)| score > s) {
                        best = Some((score, x));
                    }
                }
                best
            })
            .collect();

        let mut peak: Option<Peak> = None;
        for (y, best) in row_best.into_iter().enumerate() {
            if let Some((score, x)) = best {
                if peak.is_none_or(|p| score > p.score) {
                    peak = Some(Peak {
                        score,
                        x: x as u32,
                        y: y as u32,
                    });
                }
            }
        }
        peak
    }

    /// Sum over channels of squared deviations from the window mean.
    fn window_energy(&self, x: usize, y: usize, w: usize, h: usize, area: u64) -> f64 {
        let mut energy = 0.0;
        for c in 0..CHANNELS {
            let s1 = self.sums[c].region(x, y, w, h) as u128;
            let s2 = self.square_sums[c].region(x, y, w, h) as u128;
            let scaled = (area as u128 * s2).saturating_sub(s1 * s1);
            energy += scaled as f64 / area as f64;
        }
        energy
    }
}

/// Divide by the norm, snapping small FFT overshoot to ±1 and degenerate
/// windows to 0.
fn normalize(numerator: f64, denominator: f64) -> f64 {
    if denominator <= f64::EPSILON {
        return 0.0;
    }
    if numerator.abs() < denominator {
        numerator / denominator
    } else if numerator.abs() < denominator * 1.125 {
        numerator.signum()
    } else {
        0.0
    }
}
