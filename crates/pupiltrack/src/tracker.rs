//! Per-frame feature pipeline.
//!
//! [`EyeTracker`] wraps a [`ResolvedConfig`] and the per-run mask cache.
//! For each frame it runs prefilter, smoothing, candidate seeding, starburst
//! sampling and RANSAC fitting for the corneal reflection and the pupil.

use std::borrow::Cow;

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::candidate::{locate_candidate, BoundingBox, ConvolutionMode};
use crate::config::{CrFitMode, ResolvedConfig, TrackerConfig};
use crate::conic::{fit_ellipse_ransac, Ellipse, RansacConfig};
use crate::error::{Result, TrackError};
use crate::mask::{MaskCache, RegionMask};
use crate::starburst::{sample_boundary, StarburstParams};
use crate::EllipseParameters;

/// Fit outcome for one feature on one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFit {
    /// Fitted ellipse, `None` when the feature was not found.
    pub ellipse: Option<EllipseParameters>,
    /// Seed point `[x, y]` the rays were cast from.
    pub seed: Option<[f64; 2]>,
    pub n_boundary_points: usize,
    pub n_inliers: usize,
}

impl FeatureFit {
    pub fn found(&self) -> bool {
        self.ellipse.is_some()
    }

    /// `[center_x, center_y, rotation_angle, semi_major, semi_minor]`, NaN when not found.
    pub fn to_row(&self) -> [f64; 5] {
        match &self.ellipse {
            Some(e) => [
                e.center_x,
                e.center_y,
                e.rotation_angle,
                e.semi_major,
                e.semi_minor,
            ],
            None => [f64::NAN; 5],
        }
    }

    fn missing(seed: Option<[f64; 2]>, n_boundary_points: usize) -> Self {
        Self {
            ellipse: None,
            seed,
            n_boundary_points,
            n_inliers: 0,
        }
    }
}

/// Both feature fits for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameFeatures {
    pub pupil: FeatureFit,
    pub cr: FeatureFit,
    /// Pupil target intensity the frame was searched with.
    pub pupil_target: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feature {
    Pupil,
    Cr,
}

impl Feature {
    fn name(self) -> &'static str {
        match self {
            Self::Pupil => "pupil",
            Self::Cr => "cr",
        }
    }
}

/// Everything one feature search needs, borrowed from the tracker.
struct FeatureSearch<'a> {
    feature: Feature,
    mask: &'a RegionMask,
    bbox: Option<&'a BoundingBox>,
    target: u8,
    mode: ConvolutionMode,
    starburst: &'a StarburstParams,
    ransac: &'a RansacConfig,
}

impl FeatureSearch<'_> {
    /// Seed on `seed_image`, cast rays on `ray_image`, fit.
    ///
    /// Detection failures come back as a not-found [`FeatureFit`]; only
    /// structural errors (bad region) are returned as `Err`.
    fn run(&self, seed_image: &GrayImage, ray_image: &GrayImage) -> Result<FeatureFit> {
        let name = self.feature.name();
        let seed = locate_candidate(seed_image, self.mask, self.bbox, self.target, self.mode)?;

        let points = match sample_boundary(ray_image, seed, self.starburst) {
            Ok(points) => points,
            Err(err) if err.is_recoverable() => {
                tracing::debug!(feature = name, reason = %err, "feature not found");
                let found = match err {
                    TrackError::InsufficientPoints { found, .. } => found,
                    _ => 0,
                };
                return Ok(FeatureFit::missing(Some(seed), found));
            }
            Err(err) => return Err(err),
        };

        match fit_ellipse_ransac(&points, self.ransac) {
            Ok(fit) => {
                tracing::debug!(
                    feature = name,
                    cx = fit.ellipse.cx,
                    cy = fit.ellipse.cy,
                    a = fit.ellipse.a,
                    b = fit.ellipse.b,
                    n_points = points.len(),
                    n_inliers = fit.num_inliers,
                    "feature fitted"
                );
                Ok(FeatureFit {
                    ellipse: Some(fit.ellipse.into()),
                    seed: Some(seed),
                    n_boundary_points: points.len(),
                    n_inliers: fit.num_inliers,
                })
            }
            Err(err) => {
                let err = TrackError::from(err);
                tracing::debug!(feature = name, reason = %err, "feature not found");
                Ok(FeatureFit::missing(Some(seed), points.len()))
            }
        }
    }
}

/// Primary tracking interface.
///
/// Create once per stream, then feed frames in order. The only state carried
/// between frames is the pupil target intensity (when adaptive) and the mask
/// cache.
///
/// # Examples
///
/// ```no_run
/// use pupiltrack::{EyeTracker, TrackerConfig};
/// use image::GrayImage;
///
/// let mut tracker = EyeTracker::from_config(&TrackerConfig::default()).unwrap();
/// let frame = GrayImage::new(320, 240);
/// let features = tracker.process_frame(&frame).unwrap();
/// println!("pupil found: {}", features.pupil.found());
/// ```
#[derive(Debug)]
pub struct EyeTracker {
    config: ResolvedConfig,
    masks: MaskCache,
    pupil_target: u8,
}

impl EyeTracker {
    /// Create a tracker from an already resolved configuration.
    pub fn new(config: ResolvedConfig) -> Self {
        let pupil_target = config.eye.min_pupil_value;
        Self {
            config,
            masks: MaskCache::new(),
            pupil_target,
        }
    }

    /// Resolve `config` and create a tracker.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Ok(Self::new(config.resolve()?))
    }

    /// Access the resolved configuration.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Pupil target intensity the next frame will be searched with.
    pub fn pupil_target(&self) -> u8 {
        self.pupil_target
    }

    /// Forget adaptive state, as if no frame had been processed.
    pub fn reset(&mut self) {
        self.pupil_target = self.config.eye.min_pupil_value;
    }

    /// Prefiltered and median-smoothed frame the features are searched on.
    pub fn preprocess(&self, frame: &GrayImage) -> GrayImage {
        let filtered = match &self.config.prefilter {
            Some(prefilter) => Cow::Owned(prefilter.apply(frame)),
            None => Cow::Borrowed(frame),
        };
        let k = self.config.eye.smoothing_kernel_size;
        if k > 1 {
            imageproc::filter::median_filter(&filtered, k / 2, k / 2)
        } else {
            filtered.into_owned()
        }
    }

    /// Locate the corneal reflection and the pupil on one frame.
    ///
    /// Per-feature detection failures are reported as not found. Errors are
    /// returned only for structural problems such as a bounding box that
    /// does not fit the frame or an empty frame.
    pub fn process_frame(&mut self, frame: &GrayImage) -> Result<FrameFeatures> {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return Err(TrackError::InvalidRegion(format!("frame is {w}x{h}")));
        }
        for bb in [&self.config.pupil_bbox, &self.config.cr_bbox].into_iter().flatten() {
            bb.check_within(w, h)?;
        }

        let smoothed = self.preprocess(frame);
        let pupil_mask = self.masks.get(self.config.eye.pupil_mask_radius);
        let cr_mask = self.masks.get(self.config.eye.cr_mask_radius);
        let eye = &self.config.eye;
        let pupil_target = self.pupil_target;

        let cr_search = FeatureSearch {
            feature: Feature::Cr,
            mask: &cr_mask,
            bbox: self.config.cr_bbox.as_ref(),
            target: eye.cr_target_value,
            mode: eye.seed_mode,
            starburst: &self.config.starburst.cr,
            ransac: &self.config.ransac,
        };
        let pupil_search = FeatureSearch {
            feature: Feature::Pupil,
            mask: &pupil_mask,
            bbox: self.config.pupil_bbox.as_ref(),
            target: pupil_target,
            mode: eye.seed_mode,
            starburst: &self.config.starburst.pupil,
            ransac: &self.config.ransac,
        };
        let clip_floor = eye.clip_pupil_values.then_some(eye.min_pupil_value);

        let (cr, pupil) = if eye.recolor_cr {
            let cr = cr_search.run(&smoothed, &smoothed)?;
            let search = match &cr.ellipse {
                Some(e) => Cow::Owned(recolor(
                    &smoothed,
                    &Ellipse::from(e).scaled(eye.cr_recolor_scale_factor),
                    pupil_target,
                )),
                None => Cow::Borrowed(&smoothed),
            };
            let seed_image = clip_below(&search, clip_floor);
            (Ok(cr), pupil_search.run(&seed_image, &search))
        } else {
            std::thread::scope(|s| {
                let cr = s.spawn(|| cr_search.run(&smoothed, &smoothed));
                let seed_image = clip_below(&smoothed, clip_floor);
                let pupil = pupil_search.run(&seed_image, &smoothed);
                let cr = cr.join().unwrap_or_else(|p| std::panic::resume_unwind(p));
                (cr, pupil)
            })
        };
        let (mut cr, mut pupil) = (cr?, pupil?);

        gate(Feature::Pupil, &mut pupil, eye.max_pupil_semi_major, eye.max_eccentricity);
        gate(Feature::Cr, &mut cr, eye.max_cr_semi_major, eye.max_eccentricity);
        if eye.cr_fit_mode == CrFitMode::Circle {
            if let Some(e) = cr.ellipse.as_mut() {
                *e = e.to_circle();
            }
        }

        if eye.adaptive_pupil {
            if let Some(e) = &pupil.ellipse {
                // Core of the pupil only: skip the rim and the glint.
                let core = Ellipse::from(e).scaled(ADAPTIVE_CORE_SCALE);
                let glint = cr
                    .ellipse
                    .as_ref()
                    .map(|c| Ellipse::from(c).scaled(eye.cr_recolor_scale_factor));
                if let Some(mean) = mean_inside(&smoothed, &core, glint.as_ref()) {
                    let next = mean
                        .round()
                        .clamp(eye.min_pupil_value as f64, eye.max_pupil_value as f64);
                    self.pupil_target = next as u8;
                    tracing::trace!(target = self.pupil_target, "pupil target updated");
                }
            }
        }

        Ok(FrameFeatures {
            pupil,
            cr,
            pupil_target,
        })
    }
}

/// Fraction of the pupil axes sampled when adapting the pupil target.
const ADAPTIVE_CORE_SCALE: f64 = 0.8;

/// Drop a fit that breaks the size or eccentricity gates.
fn gate(
    feature: Feature,
    fit: &mut FeatureFit,
    max_semi_major: Option<f64>,
    max_eccentricity: Option<f64>,
) {
    let Some(e) = &fit.ellipse else {
        return;
    };
    let too_big = max_semi_major.is_some_and(|m| e.semi_major > m);
    let too_flat = max_eccentricity.is_some_and(|m| Ellipse::from(e).eccentricity() > m);
    if too_big || too_flat {
        tracing::debug!(
            feature = feature.name(),
            semi_major = e.semi_major,
            too_big,
            too_flat,
            "fit rejected by gate"
        );
        fit.ellipse = None;
    }
}

/// Copy of `image` with every pixel below `floor` raised to it.
fn clip_below<'a>(image: &'a GrayImage, floor: Option<u8>) -> Cow<'a, GrayImage> {
    match floor {
        Some(floor) if floor > 0 => {
            let mut out = image.clone();
            out.pixels_mut().for_each(|p| p[0] = p[0].max(floor));
            Cow::Owned(out)
        }
        _ => Cow::Borrowed(image),
    }
}

/// Pixel centers inside `ellipse`, clipped to the image.
fn pixels_inside<'a>(
    image: &'a GrayImage,
    ellipse: &Ellipse,
) -> impl Iterator<Item = (u32, u32)> + 'a {
    let [xmin, xmax, ymin, ymax] = ellipse.bounds();
    let (w, h) = image.dimensions();
    let clamp = |v: f64, n: u32| v.clamp(0.0, n as f64) as u32;
    let (x0, x1) = (clamp(xmin.floor(), w), clamp(xmax.ceil() + 1.0, w));
    let (y0, y1) = (clamp(ymin.floor(), h), clamp(ymax.ceil() + 1.0, h));
    let ellipse = *ellipse;
    (y0..y1)
        .flat_map(move |y| (x0..x1).map(move |x| (x, y)))
        .filter(move |&(x, y)| ellipse.contains(x as f64, y as f64))
}

/// Copy of `image` with the ellipse interior painted `value`.
fn recolor(image: &GrayImage, ellipse: &Ellipse, value: u8) -> GrayImage {
    let mut out = image.clone();
    for (x, y) in pixels_inside(image, ellipse) {
        out.put_pixel(x, y, Luma([value]));
    }
    out
}

/// Mean intensity over the ellipse interior minus `exclude`, `None` if no
/// pixel center qualifies.
fn mean_inside(image: &GrayImage, ellipse: &Ellipse, exclude: Option<&Ellipse>) -> Option<f64> {
    let (sum, n) = pixels_inside(image, ellipse)
        .filter(|&(x, y)| !exclude.is_some_and(|e| e.contains(x as f64, y as f64)))
        .fold((0u64, 0u64), |(s, n), (x, y)| (s + image.get_pixel(x, y)[0] as u64, n + 1));
    (n > 0).then(|| sum as f64 / n as f64)
}
