//! Matched-filter seeding: find the most likely center of a disk-shaped
//! feature with a given characteristic intensity.
//!
//! The frame (optionally cropped to a bounding box) is mapped to a similarity
//! image whose brightest pixels are those closest to the target intensity,
//! convolved with a disk mask, and the centroid of all positions attaining the
//! maximum response is returned. Averaging tied maxima keeps the seed stable
//! when the feature is smaller than the mask and the response plateaus.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::mask::RegionMask;

/// Rectangular region of interest, half-open: columns `xmin..xmax`, rows `ymin..ymax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: u32,
    pub xmax: u32,
    pub ymin: u32,
    pub ymax: u32,
}

impl BoundingBox {
    /// Construct a box, rejecting inverted or empty bounds.
    pub fn new(xmin: u32, xmax: u32, ymin: u32, ymax: u32) -> Result<Self> {
        if xmin >= xmax || ymin >= ymax {
            return Err(TrackError::config(format!(
                "bounding box must satisfy xmin < xmax and ymin < ymax, got [{xmin}, {xmax}, {ymin}, {ymax}]"
            )));
        }
        Ok(Self {
            xmin,
            xmax,
            ymin,
            ymax,
        })
    }

    /// Parse the `[xmin, xmax, ymin, ymax]` configuration form.
    ///
    /// An empty slice means "no box". Any other arity, negative values, or
    /// inverted bounds are configuration errors.
    pub fn from_values(values: &[i64]) -> Result<Option<Self>> {
        match values {
            [] => Ok(None),
            &[xmin, xmax, ymin, ymax] => {
                let to_u32 = |v: i64| {
                    u32::try_from(v).map_err(|_| {
                        TrackError::config(format!("bounding box coordinate {v} is out of range"))
                    })
                };
                Self::new(to_u32(xmin)?, to_u32(xmax)?, to_u32(ymin)?, to_u32(ymax)?).map(Some)
            }
            other => Err(TrackError::config(format!(
                "bounding box needs exactly 4 values [xmin, xmax, ymin, ymax], got {}",
                other.len()
            ))),
        }
    }

    pub fn width(&self) -> u32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> u32 {
        self.ymax - self.ymin
    }

    /// Fail with [`TrackError::Bounds`] unless the box fits a `width` x `height` frame.
    pub fn check_within(&self, width: u32, height: u32) -> Result<()> {
        if self.xmax > width || self.ymax > height {
            return Err(TrackError::Bounds {
                xmin: self.xmin,
                xmax: self.xmax,
                ymin: self.ymin,
                ymax: self.ymax,
                width,
                height,
            });
        }
        Ok(())
    }
}

/// Which convolution outputs may host the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvolutionMode {
    /// Same-size output, zero padding outside the image.
    #[default]
    Same,
    /// Only positions where the mask lies fully inside the image.
    Valid,
}

/// Map `image` so that pixels closest to `value` become brightest.
///
/// `out = max(d) - d` with `d = |pixel - value|`.
pub fn similarity_to_value(image: &GrayImage, value: u8) -> GrayImage {
    let max_dist = image
        .pixels()
        .map(|p| p[0].abs_diff(value))
        .max()
        .unwrap_or(0);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([max_dist - image.get_pixel(x, y)[0].abs_diff(value)])
    })
}

/// Linear convolution of `image` with `mask`, same-size output, zero padded.
///
/// Returned row-major, `width * height` long. Sums are exact integers so
/// equal responses compare equal.
pub fn convolve_same(image: &GrayImage, mask: &RegionMask) -> Vec<u64> {
    let (w, h) = image.dimensions();
    let (w, h) = (w as usize, h as usize);
    let stride = w + 1;

    // Row prefix sums: prefix[y * stride + k] = sum of the first k pixels of row y.
    let raw = image.as_raw();
    let mut prefix = vec![0u64; h * stride];
    for y in 0..h {
        let mut acc = 0u64;
        for x in 0..w {
            acc += raw[y * w + x] as u64;
            prefix[y * stride + x + 1] = acc;
        }
    }

    let r = mask.radius() as i64;
    let spans = mask.row_spans();
    let mut out = vec![0u64; w * h];
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut acc = 0u64;
            for (m, row_spans) in spans.iter().enumerate() {
                // Convolution flips the kernel: row m samples image row y + r - m.
                let yy = y + r - m as i64;
                if yy < 0 || yy >= h as i64 {
                    continue;
                }
                let base = yy as usize * stride;
                for &(c0, c1) in row_spans {
                    let lo = (x + r + 1 - c1 as i64).max(0);
                    let hi = (x + r - c0 as i64).min(w as i64 - 1);
                    if lo <= hi {
                        acc += prefix[base + hi as usize + 1] - prefix[base + lo as usize];
                    }
                }
            }
            out[y as usize * w + x as usize] = acc;
        }
    }
    out
}

/// Locate the most likely center `[x, y]` of a feature with intensity `target_value`.
///
/// The search is restricted to `bounding_box` when given; the returned point is
/// in full-frame coordinates. All positions attaining the maximum response are
/// averaged, so the result can be sub-pixel.
pub fn locate_candidate(
    frame: &GrayImage,
    mask: &RegionMask,
    bounding_box: Option<&BoundingBox>,
    target_value: u8,
    mode: ConvolutionMode,
) -> Result<[f64; 2]> {
    let (fw, fh) = frame.dimensions();
    let (cropped, origin) = match bounding_box {
        Some(bb) => {
            bb.check_within(fw, fh)?;
            let view = image::imageops::crop_imm(frame, bb.xmin, bb.ymin, bb.width(), bb.height());
            (view.to_image(), [bb.xmin, bb.ymin])
        }
        None => (frame.clone(), [0, 0]),
    };

    let (w, h) = cropped.dimensions();
    if w == 0 || h == 0 {
        return Err(TrackError::InvalidRegion(format!(
            "search region is {w}x{h}"
        )));
    }

    let similarity = similarity_to_value(&cropped, target_value);
    let response = convolve_same(&similarity, mask);

    let (x_range, y_range) = match mode {
        ConvolutionMode::Same => (0..w as usize, 0..h as usize),
        ConvolutionMode::Valid => {
            let r = mask.radius() as usize;
            if w as usize <= 2 * r || h as usize <= 2 * r {
                return Err(TrackError::InvalidRegion(format!(
                    "{w}x{h} region is smaller than the {side}x{side} mask",
                    side = mask.side()
                )));
            }
            (r..w as usize - r, r..h as usize - r)
        }
    };

    let mut best = 0u64;
    let mut sum_x = 0u64;
    let mut sum_y = 0u64;
    let mut n_ties = 0u64;
    for y in y_range {
        for x in x_range.clone() {
            let v = response[y * w as usize + x];
            if n_ties == 0 || v > best {
                best = v;
                sum_x = x as u64;
                sum_y = y as u64;
                n_ties = 1;
            } else if v == best {
                sum_x += x as u64;
                sum_y += y as u64;
                n_ties += 1;
            }
        }
    }

    let cx = sum_x as f64 / n_ties as f64 + origin[0] as f64;
    let cy = sum_y as f64 / n_ties as f64 + origin[1] as f64;
    tracing::trace!(cx, cy, response = best, n_ties, "candidate located");
    Ok([cx, cy])
}
