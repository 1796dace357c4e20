//! Serialized tracker configuration and its one-time resolution.
//!
//! [`TrackerConfig`] mirrors the JSON surface. [`TrackerConfig::resolve`]
//! validates every field and produces the immutable [`ResolvedConfig`] the
//! tracker runs with, so malformed input fails before any frame is read.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::candidate::{BoundingBox, ConvolutionMode};
use crate::conic::RansacConfig;
use crate::error::{Result, TrackError};
use crate::prefilter::{Prefilter, PrefilterConfig};
use crate::starburst::{ResolvedStarburst, StarburstConfig};
use crate::stream::StreamRange;

/// How the corneal reflection fit is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrFitMode {
    /// Full RANSAC ellipse.
    #[default]
    Ellipse,
    /// Equal-area circle (`r = sqrt(a * b)`, zero rotation).
    Circle,
}

/// Eye-specific knobs of the frame pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeParams {
    /// Median blur kernel side (odd). `1` disables smoothing.
    pub smoothing_kernel_size: u32,
    /// Disk radius used to seed the pupil.
    pub pupil_mask_radius: u32,
    /// Disk radius used to seed the corneal reflection.
    pub cr_mask_radius: u32,
    /// Lower bound (and non-adaptive value) of the pupil target intensity.
    pub min_pupil_value: u8,
    /// Upper bound of the adaptive pupil target intensity.
    pub max_pupil_value: u8,
    /// Track the pupil intensity from frame to frame.
    pub adaptive_pupil: bool,
    /// Clamp the pupil seeding image to `[min_pupil_value, 255]`.
    pub clip_pupil_values: bool,
    /// Target intensity of the corneal reflection seed.
    pub cr_target_value: u8,
    /// Paint the found CR out of the pupil search image.
    pub recolor_cr: bool,
    /// Growth applied to the CR ellipse before painting it out.
    pub cr_recolor_scale_factor: f64,
    pub max_pupil_semi_major: Option<f64>,
    pub max_cr_semi_major: Option<f64>,
    /// Reject fits more eccentric than this, in `[0, 1)`.
    pub max_eccentricity: Option<f64>,
    pub cr_fit_mode: CrFitMode,
    /// Convolution outputs eligible as seeds.
    pub seed_mode: ConvolutionMode,
}

impl Default for EyeParams {
    fn default() -> Self {
        Self {
            smoothing_kernel_size: 7,
            pupil_mask_radius: 40,
            cr_mask_radius: 10,
            min_pupil_value: 0,
            max_pupil_value: 30,
            adaptive_pupil: false,
            clip_pupil_values: true,
            cr_target_value: 255,
            recolor_cr: true,
            cr_recolor_scale_factor: 1.7,
            max_pupil_semi_major: None,
            max_cr_semi_major: None,
            max_eccentricity: None,
            cr_fit_mode: CrFitMode::Ellipse,
            seed_mode: ConvolutionMode::Same,
        }
    }
}

fn validate_eye_params(eye: &EyeParams) -> std::result::Result<(), String> {
    if eye.smoothing_kernel_size == 0 || eye.smoothing_kernel_size % 2 == 0 {
        return Err(format!(
            "smoothing_kernel_size must be odd and >= 1, got {}",
            eye.smoothing_kernel_size
        ));
    }

    if eye.min_pupil_value > eye.max_pupil_value {
        return Err(format!(
            "min_pupil_value ({}) must not exceed max_pupil_value ({})",
            eye.min_pupil_value, eye.max_pupil_value
        ));
    }

    if !eye.cr_recolor_scale_factor.is_finite() || eye.cr_recolor_scale_factor <= 0.0 {
        return Err("cr_recolor_scale_factor must be finite and > 0".to_string());
    }

    for (name, limit) in [
        ("max_pupil_semi_major", eye.max_pupil_semi_major),
        ("max_cr_semi_major", eye.max_cr_semi_major),
    ] {
        if let Some(v) = limit {
            if !v.is_finite() || v <= 0.0 {
                return Err(format!("{name} must be finite and > 0"));
            }
        }
    }

    if let Some(e) = eye.max_eccentricity {
        if !(0.0..1.0).contains(&e) {
            return Err(format!("max_eccentricity must lie in [0, 1), got {e}"));
        }
    }

    Ok(())
}

fn validate_ransac(ransac: &RansacConfig) -> std::result::Result<(), String> {
    if !ransac.inlier_tolerance.is_finite() || ransac.inlier_tolerance <= 0.0 {
        return Err("ransac.inlier_tolerance must be finite and > 0".to_string());
    }
    if !(0.0..=1.0).contains(&ransac.min_inlier_fraction) {
        return Err("ransac.min_inlier_fraction must lie in [0, 1]".to_string());
    }
    if ransac.iterations == 0 {
        return Err("ransac.iterations must be >= 1".to_string());
    }
    Ok(())
}

/// Complete tracker configuration as stored on disk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub starburst: StarburstConfig,
    pub ransac: RansacConfig,
    /// Empty, or exactly `[xmin, xmax, ymin, ymax]`.
    pub pupil_bounding_box: Vec<i64>,
    /// Empty, or exactly `[xmin, xmax, ymin, ymax]`.
    pub cr_bounding_box: Vec<i64>,
    pub prefilter: PrefilterConfig,
    pub stream: StreamRange,
    pub eye: EyeParams,
}

impl TrackerConfig {
    /// Parse from a JSON string. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TrackError::config(format!("invalid JSON: {e}")))
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            TrackError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&data)
    }

    /// Validate everything and build the run-time configuration.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let starburst = self.starburst.resolve()?;
        validate_ransac(&self.ransac).map_err(TrackError::Configuration)?;
        validate_eye_params(&self.eye).map_err(TrackError::Configuration)?;
        self.stream.validate()?;

        let pupil_bbox = BoundingBox::from_values(&self.pupil_bounding_box)?;
        let cr_bbox = BoundingBox::from_values(&self.cr_bounding_box)?;
        let prefilter = self.prefilter.build()?;

        if self.eye.adaptive_pupil && self.eye.min_pupil_value == self.eye.max_pupil_value {
            tracing::warn!(
                value = self.eye.min_pupil_value,
                "adaptive_pupil has no room to adapt: min_pupil_value == max_pupil_value"
            );
        }

        Ok(ResolvedConfig {
            starburst,
            ransac: self.ransac.clone(),
            pupil_bbox,
            cr_bbox,
            prefilter,
            stream: self.stream.clone(),
            eye: self.eye.clone(),
        })
    }
}

/// Validated, immutable configuration used by the tracker.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub starburst: ResolvedStarburst,
    pub ransac: RansacConfig,
    pub pupil_bbox: Option<BoundingBox>,
    pub cr_bbox: Option<BoundingBox>,
    pub prefilter: Option<Box<dyn Prefilter>>,
    pub stream: StreamRange,
    pub eye: EyeParams,
}
