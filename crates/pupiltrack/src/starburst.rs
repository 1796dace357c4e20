//! Starburst boundary sampling.
//!
//! Rays are cast from a seed point inside a roughly convex feature. Each ray
//! scans outward at one-pixel steps and reports the first position where the
//! intensity departs from the ray's own baseline by the configured factor and
//! stays there for `threshold_pixels` consecutive samples.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::conic::MIN_SAMPLE;
use crate::error::{Result, TrackError};

/// Fewest boundary points worth handing to the ellipse fitter.
pub const MIN_BOUNDARY_POINTS: usize = MIN_SAMPLE;

/// Raw starburst settings as they appear in the configuration file.
///
/// The `pupil_*` / `cr_*` overrides inherit the generic value when `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarburstConfig {
    /// Relative intensity jump that marks a boundary.
    pub threshold_factor: f64,
    /// Baseline window and minimum run length, in samples.
    pub threshold_pixels: usize,
    pub pupil_threshold_factor: Option<f64>,
    pub cr_threshold_factor: Option<f64>,
    pub pupil_threshold_pixels: Option<usize>,
    pub cr_threshold_pixels: Option<usize>,
    /// Number of rays spread evenly over the full circle.
    pub n_rays: usize,
    /// Maximum number of samples per ray.
    pub ray_length: usize,
}

impl Default for StarburstConfig {
    fn default() -> Self {
        Self {
            threshold_factor: 1.5,
            threshold_pixels: 5,
            pupil_threshold_factor: None,
            cr_threshold_factor: None,
            pupil_threshold_pixels: None,
            cr_threshold_pixels: None,
            n_rays: 64,
            ray_length: 150,
        }
    }
}

/// Which side of the boundary is brighter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeaturePolarity {
    /// Dark blob on a brighter surround (pupil).
    Dark,
    /// Bright blob on a darker surround (corneal reflection).
    Bright,
}

/// Fully resolved sampler settings for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StarburstParams {
    pub threshold_factor: f64,
    pub threshold_pixels: usize,
    pub n_rays: usize,
    pub ray_length: usize,
    pub polarity: FeaturePolarity,
}

/// Per-feature sampler settings, resolved once before streaming.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStarburst {
    pub pupil: StarburstParams,
    pub cr: StarburstParams,
}

impl StarburstConfig {
    /// Apply per-feature overrides and validate the numbers.
    pub fn resolve(&self) -> Result<ResolvedStarburst> {
        if self.n_rays == 0 {
            return Err(TrackError::config("starburst.n_rays must be positive"));
        }
        if self.ray_length == 0 {
            return Err(TrackError::config("starburst.ray_length must be positive"));
        }

        let feature = |name: &str,
                       factor: Option<f64>,
                       pixels: Option<usize>,
                       polarity: FeaturePolarity|
         -> Result<StarburstParams> {
            let threshold_factor = factor.unwrap_or(self.threshold_factor);
            let threshold_pixels = pixels.unwrap_or(self.threshold_pixels);
            if !(threshold_factor.is_finite() && threshold_factor > 0.0) {
                return Err(TrackError::config(format!(
                    "{name} threshold factor must be positive, got {threshold_factor}"
                )));
            }
            if threshold_pixels == 0 {
                return Err(TrackError::config(format!(
                    "{name} threshold pixels must be at least 1"
                )));
            }
            Ok(StarburstParams {
                threshold_factor,
                threshold_pixels,
                n_rays: self.n_rays,
                ray_length: self.ray_length,
                polarity,
            })
        };

        Ok(ResolvedStarburst {
            pupil: feature(
                "pupil",
                self.pupil_threshold_factor,
                self.pupil_threshold_pixels,
                FeaturePolarity::Dark,
            )?,
            cr: feature(
                "cr",
                self.cr_threshold_factor,
                self.cr_threshold_pixels,
                FeaturePolarity::Bright,
            )?,
        })
    }
}

/// Sample a grayscale image at a sub-pixel position using bilinear interpolation.
///
/// Returns the intensity on the 0..=255 scale, or `None` when the 2x2
/// neighbourhood leaves the image.
#[inline]
pub(crate) fn bilinear_sample(img: &GrayImage, x: f64, y: f64) -> Option<f64> {
    let (w, h) = img.dimensions();
    if w < 2 || h < 2 || !(x >= 0.0 && y >= 0.0) {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    if x0 >= w - 1 || y0 >= h - 1 {
        return None;
    }

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let stride = w as usize;
    let idx00 = y0 as usize * stride + x0 as usize;
    let raw = img.as_raw();
    let p00 = raw[idx00] as f64;
    let p10 = raw[idx00 + 1] as f64;
    let p01 = raw[idx00 + stride] as f64;
    let p11 = raw[idx00 + stride + 1] as f64;

    Some(
        (1.0 - fx) * (1.0 - fy) * p00
            + fx * (1.0 - fy) * p10
            + (1.0 - fx) * fy * p01
            + fx * fy * p11,
    )
}

/// Index of the first sample that starts a run of `run` consecutive samples
/// satisfying `crossed`, searching from `start`.
fn first_sustained_crossing(
    samples: &[f64],
    start: usize,
    run: usize,
    crossed: impl Fn(f64) -> bool,
) -> Option<usize> {
    let mut streak = 0usize;
    for (k, &v) in samples.iter().enumerate().skip(start) {
        if crossed(v) {
            streak += 1;
            if streak == run {
                return Some(k + 1 - run);
            }
        } else {
            streak = 0;
        }
    }
    None
}

/// Boundary position along one ray, if the ray crosses.
fn scan_ray(
    image: &GrayImage,
    seed: [f64; 2],
    dir: [f64; 2],
    params: &StarburstParams,
    samples: &mut Vec<f64>,
) -> Option<[f64; 2]> {
    samples.clear();
    for k in 0..params.ray_length {
        let x = seed[0] + dir[0] * k as f64;
        let y = seed[1] + dir[1] * k as f64;
        match bilinear_sample(image, x, y) {
            Some(v) => samples.push(v),
            None => break,
        }
    }

    let window = params.threshold_pixels;
    if samples.len() <= window {
        return None;
    }
    let baseline = samples[..window].iter().sum::<f64>() / window as f64;
    let factor = params.threshold_factor;

    let k = match params.polarity {
        FeaturePolarity::Dark => {
            // A pitch-black pupil would otherwise cross on any nonzero sample.
            let level = baseline.max(1.0) * factor;
            first_sustained_crossing(samples, window, window, |v| v > level)
        }
        FeaturePolarity::Bright => {
            let level = baseline / factor;
            first_sustained_crossing(samples, window, window, |v| v < level)
        }
    }?;

    Some([seed[0] + dir[0] * k as f64, seed[1] + dir[1] * k as f64])
}

/// Cast `params.n_rays` rays from `seed` and collect at most one boundary
/// point per ray, in ray order. Rays that never cross contribute nothing.
pub fn cast_rays(image: &GrayImage, seed: [f64; 2], params: &StarburstParams) -> Vec<[f64; 2]> {
    let mut samples = Vec::with_capacity(params.ray_length);
    let step = std::f64::consts::TAU / params.n_rays as f64;
    (0..params.n_rays)
        .filter_map(|i| {
            let (s, c) = (step * i as f64).sin_cos();
            scan_ray(image, seed, [c, s], params, &mut samples)
        })
        .collect()
}

/// Like [`cast_rays`], but fails when too few points were found to fit an ellipse.
pub fn sample_boundary(
    image: &GrayImage,
    seed: [f64; 2],
    params: &StarburstParams,
) -> Result<Vec<[f64; 2]>> {
    let points = cast_rays(image, seed, params);
    tracing::debug!(
        seed_x = seed[0],
        seed_y = seed[1],
        n_points = points.len(),
        polarity = ?params.polarity,
        "starburst sampled"
    );
    if points.len() < MIN_BOUNDARY_POINTS {
        return Err(TrackError::InsufficientPoints {
            needed: MIN_BOUNDARY_POINTS,
            found: points.len(),
        });
    }
    Ok(points)
}
