//! pupiltrack: pure-Rust pupil and corneal-reflection tracker for eye video.
//!
//! Every frame goes through the same stages:
//!
//! 1. **Prefilter** – optional whole-frame contrast normalization (CLAHE).
//! 2. **Smoothing** – median blur to suppress sensor noise and eyelashes.
//! 3. **Candidate** – disk matched filter that seeds each feature.
//! 4. **Starburst** – rays cast from the seed, one boundary point per ray.
//! 5. **Conic** – seeded RANSAC over five-point conics, refined by a direct
//!    least-squares ellipse fit.
//!
//! The corneal reflection is located first; when found it is painted out of
//! the pupil search image. [`process_stream`] drives a [`FrameSource`] and
//! accumulates the parameter series, the mean frame and the density maps.
//!
//! # Public API
//! - [`EyeTracker`] and [`TrackerConfig`] as primary entry points
//! - [`process_stream`], [`FrameSource`], [`StreamOutput`] for whole recordings
//! - the stage functions ([`locate_candidate`], [`sample_boundary`],
//!   [`fit_ellipse_ransac`]) for callers that assemble their own pipeline

mod candidate;
mod config;
mod conic;
mod error;
mod mask;
mod prefilter;
mod starburst;
mod stream;
mod tracker;

#[cfg(test)]
mod test_utils;

pub use candidate::{
    convolve_same, locate_candidate, similarity_to_value, BoundingBox, ConvolutionMode,
};
pub use config::{CrFitMode, EyeParams, ResolvedConfig, TrackerConfig};
pub use conic::{
    conic_to_ellipse, ellipse_to_conic, fit_conic_direct, fit_conic_five_point,
    fit_ellipse_direct, fit_ellipse_five_point, fit_ellipse_least_squares, fit_ellipse_ransac,
    rms_sampson_distance, ConicCoeffs, ConicError, Ellipse, RansacConfig, RansacResult,
};
pub use error::{Result, TrackError};
pub use mask::{MaskCache, RegionMask};
pub use prefilter::{
    build_prefilter, prefilter_names, ClahePrefilter, ClaheParams, Prefilter, PrefilterConfig,
};
pub use starburst::{
    cast_rays, sample_boundary, FeaturePolarity, ResolvedStarburst, StarburstConfig,
    StarburstParams, MIN_BOUNDARY_POINTS,
};
pub use stream::{
    process_stream, AccumulatorState, AnnotationSink, DensityMap, FrameSource, MeanFrame,
    StreamAccumulator, StreamOutput, StreamRange, VecFrameSource,
};
pub use tracker::{EyeTracker, FeatureFit, FrameFeatures};

/// Ellipse parameters for serialization (center + geometry), frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EllipseParameters {
    /// Center x (column).
    pub center_x: f64,
    /// Center y (row).
    pub center_y: f64,
    pub semi_major: f64,
    pub semi_minor: f64,
    /// Rotation of the major axis from +x, in radians.
    pub rotation_angle: f64,
}

impl EllipseParameters {
    pub fn center(&self) -> [f64; 2] {
        [self.center_x, self.center_y]
    }

    /// Equal-area circle with zero rotation.
    pub fn to_circle(&self) -> Self {
        let r = (self.semi_major * self.semi_minor).sqrt();
        Self {
            semi_major: r,
            semi_minor: r,
            rotation_angle: 0.0,
            ..*self
        }
    }
}

impl From<conic::Ellipse> for EllipseParameters {
    fn from(e: conic::Ellipse) -> Self {
        Self {
            center_x: e.cx,
            center_y: e.cy,
            semi_major: e.a,
            semi_minor: e.b,
            rotation_angle: e.angle,
        }
    }
}

impl From<&EllipseParameters> for conic::Ellipse {
    fn from(p: &EllipseParameters) -> Self {
        Self {
            cx: p.center_x,
            cy: p.center_y,
            a: p.semi_major.abs(),
            b: p.semi_minor.abs(),
            angle: p.rotation_angle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ellipse_parameters_convert_both_ways() {
        let e = Ellipse {
            cx: 3.0,
            cy: 4.0,
            a: 9.0,
            b: 4.0,
            angle: 0.25,
        };
        let p = EllipseParameters::from(e);
        assert_eq!(p.center(), [3.0, 4.0]);
        assert_eq!(Ellipse::from(&p), e);

        let c = p.to_circle();
        assert_relative_eq!(c.semi_major, 6.0);
        assert_relative_eq!(c.semi_minor, 6.0);
        assert_eq!(c.rotation_angle, 0.0);
        assert_eq!(c.center(), p.center());
    }

    #[test]
    fn not_found_serializes_as_null() {
        let fit = FeatureFit::default();
        let json = serde_json::to_value(&fit).unwrap();
        assert!(json["ellipse"].is_null());
        assert!(!fit.found());
    }
}
