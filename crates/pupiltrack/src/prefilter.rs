//! Optional whole-frame prefilters applied before feature search.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};

/// Frame-to-frame image transform run ahead of candidate location.
///
/// Implementations must be pure: the same input frame always produces the
/// same output, and no state is carried between frames.
///
/// # Example
///
/// ```
/// use image::GrayImage;
/// use pupiltrack::Prefilter;
///
/// #[derive(Debug)]
/// struct Invert;
///
/// impl Prefilter for Invert {
///     fn name(&self) -> &str {
///         "invert"
///     }
///     fn apply(&self, frame: &GrayImage) -> GrayImage {
///         let mut out = frame.clone();
///         out.pixels_mut().for_each(|p| p[0] = 255 - p[0]);
///         out
///     }
/// }
/// ```
pub trait Prefilter: Send + Sync + std::fmt::Debug {
    /// Registry identifier.
    fn name(&self) -> &str;
    /// Return the filtered frame.
    fn apply(&self, frame: &GrayImage) -> GrayImage;
}

/// Parameters of the contrast-limited adaptive histogram equalization filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClaheParams {
    /// Histogram clip level, relative to a flat histogram.
    pub clip_limit: f64,
    /// Tiles per image axis.
    pub tile_grid_size: u32,
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            clip_limit: 3.0,
            tile_grid_size: 8,
        }
    }
}

/// CLAHE: per-tile clipped histogram equalization, bilinearly blended
/// between neighbouring tiles.
#[derive(Debug, Clone)]
pub struct ClahePrefilter {
    params: ClaheParams,
}

impl ClahePrefilter {
    pub fn new(params: ClaheParams) -> Result<Self> {
        if !(params.clip_limit.is_finite() && params.clip_limit > 0.0) {
            return Err(TrackError::config(format!(
                "CLAHE clip_limit must be positive, got {}",
                params.clip_limit
            )));
        }
        if params.tile_grid_size == 0 {
            return Err(TrackError::config("CLAHE tile_grid_size must be at least 1"));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &ClaheParams {
        &self.params
    }

    fn tile_lut(&self, frame: &GrayImage, x0: u32, x1: u32, y0: u32, y1: u32) -> [u8; 256] {
        let mut hist = [0u32; 256];
        for y in y0..y1 {
            for x in x0..x1 {
                hist[frame.get_pixel(x, y)[0] as usize] += 1;
            }
        }
        let area = (x1 - x0) * (y1 - y0);
        let limit = ((self.params.clip_limit * area as f64 / 256.0) as u32).max(1);

        let mut excess = 0u32;
        for h in hist.iter_mut() {
            if *h > limit {
                excess += *h - limit;
                *h = limit;
            }
        }
        let batch = excess / 256;
        let residual = (excess % 256) as usize;
        hist.iter_mut().for_each(|h| *h += batch);
        if residual > 0 {
            // Leftover counts go to evenly spaced bins across the full range.
            let stride = (256 / residual).max(1);
            for h in hist.iter_mut().step_by(stride).take(residual) {
                *h += 1;
            }
        }

        let mut lut = [0u8; 256];
        let scale = 255.0 / area as f64;
        let mut cdf = 0u32;
        for (v, h) in hist.iter().enumerate() {
            cdf += h;
            lut[v] = (cdf as f64 * scale).round().min(255.0) as u8;
        }
        lut
    }
}

/// Fractional tile coordinate of pixel `p` along an axis of `len` pixels
/// split into `n` tiles: (lower tile, upper tile, weight of upper).
fn tile_blend(p: u32, len: u32, n: u32) -> (usize, usize, f64) {
    let tile = len as f64 / n as f64;
    let g = (p as f64 + 0.5) / tile - 0.5;
    if g <= 0.0 {
        return (0, 0, 0.0);
    }
    let lo = (g.floor() as u32).min(n - 1);
    let hi = (lo + 1).min(n - 1);
    (lo as usize, hi as usize, (g - lo as f64).clamp(0.0, 1.0))
}

impl Prefilter for ClahePrefilter {
    fn name(&self) -> &str {
        "CLAHE"
    }

    fn apply(&self, frame: &GrayImage) -> GrayImage {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return frame.clone();
        }
        let nx = self.params.tile_grid_size.min(w);
        let ny = self.params.tile_grid_size.min(h);

        let edge = |i: u32, n: u32, len: u32| (i as u64 * len as u64 / n as u64) as u32;
        let mut luts = Vec::with_capacity((nx * ny) as usize);
        for ty in 0..ny {
            for tx in 0..nx {
                luts.push(self.tile_lut(
                    frame,
                    edge(tx, nx, w),
                    edge(tx + 1, nx, w),
                    edge(ty, ny, h),
                    edge(ty + 1, ny, h),
                ));
            }
        }

        let cols: Vec<_> = (0..w).map(|x| tile_blend(x, w, nx)).collect();
        let mut out = GrayImage::new(w, h);
        for y in 0..h {
            let (ty0, ty1, fy) = tile_blend(y, h, ny);
            for (x, &(tx0, tx1, fx)) in cols.iter().enumerate() {
                let v = frame.get_pixel(x as u32, y)[0] as usize;
                let at = |ty: usize, tx: usize| luts[ty * nx as usize + tx][v] as f64;
                let top = (1.0 - fx) * at(ty0, tx0) + fx * at(ty0, tx1);
                let bottom = (1.0 - fx) * at(ty1, tx0) + fx * at(ty1, tx1);
                let blended = (1.0 - fy) * top + fy * bottom;
                out.put_pixel(x as u32, y, Luma([blended.round().clamp(0.0, 255.0) as u8]));
            }
        }
        out
    }
}

type PrefilterCtor = fn(&serde_json::Value) -> Result<Box<dyn Prefilter>>;

fn build_clahe(kwargs: &serde_json::Value) -> Result<Box<dyn Prefilter>> {
    let params: ClaheParams = if kwargs.is_null() {
        ClaheParams::default()
    } else {
        serde_json::from_value(kwargs.clone())
            .map_err(|e| TrackError::config(format!("invalid CLAHE kwargs: {e}")))?
    };
    Ok(Box::new(ClahePrefilter::new(params)?))
}

const REGISTRY: &[(&str, PrefilterCtor)] = &[("CLAHE", build_clahe)];

/// Identifiers accepted by [`build_prefilter`].
pub fn prefilter_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

/// Construct a registered prefilter from its name and keyword arguments.
pub fn build_prefilter(name: &str, kwargs: &serde_json::Value) -> Result<Box<dyn Prefilter>> {
    let (_, ctor) = REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| {
            let valid: Vec<_> = prefilter_names().collect();
            TrackError::config(format!(
                "unknown prefilter {name:?}; valid options are {valid:?}"
            ))
        })?;
    ctor(kwargs)
}

/// Prefilter section of the tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefilterConfig {
    pub apply_prefilter: bool,
    pub prefilter_class: String,
    pub prefilter_kwargs: serde_json::Value,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            apply_prefilter: false,
            prefilter_class: "CLAHE".to_string(),
            prefilter_kwargs: serde_json::json!({}),
        }
    }
}

impl PrefilterConfig {
    /// Build the configured filter, or `None` when prefiltering is off.
    pub fn build(&self) -> Result<Option<Box<dyn Prefilter>>> {
        if !self.apply_prefilter {
            return Ok(None);
        }
        build_prefilter(&self.prefilter_class, &self.prefilter_kwargs).map(Some)
    }
}
