//! Conic and ellipse types with conversions.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors that can occur during ellipse fitting.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConicError {
    /// Too few points for the requested operation.
    #[error("too few points: need {needed}, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    /// No sampled model gathered enough inliers.
    #[error("insufficient inliers: need {needed}, best model had {found}")]
    InsufficientInliers { needed: usize, found: usize },
}

// ── Types ──────────────────────────────────────────────────────────────────

/// General conic: A x² + B xy + C y² + D x + E y + F = 0, stored as [A, B, C, D, E, F].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicCoeffs(pub [f64; 6]);

/// Geometric ellipse parameters in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center x (column).
    pub cx: f64,
    /// Center y (row).
    pub cy: f64,
    /// Semi-major axis length.
    pub a: f64,
    /// Semi-minor axis length.
    pub b: f64,
    /// Rotation of the major axis from +x, in radians (−π/2, π/2].
    pub angle: f64,
}

/// Configuration for RANSAC ellipse fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Inlier tolerance: Sampson distance in pixels.
    pub inlier_tolerance: f64,
    /// Minimum absolute inlier count for an accepted model.
    pub min_inliers: usize,
    /// Minimum inlier count as a fraction of all points.
    pub min_inlier_fraction: f64,
    /// Number of minimal samples drawn.
    pub iterations: usize,
    /// RNG seed; each fit restarts from it so results are reproducible.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            inlier_tolerance: 1.0,
            min_inliers: 10,
            min_inlier_fraction: 0.3,
            iterations: 500,
            seed: 42,
        }
    }
}

impl RansacConfig {
    /// Inliers needed for a point set of size `n`.
    pub fn required_inliers(&self, n: usize) -> usize {
        let frac = (self.min_inlier_fraction.clamp(0.0, 1.0) * n as f64).ceil() as usize;
        self.min_inliers.max(frac).max(super::MIN_SAMPLE)
    }
}

/// Result of a RANSAC fit.
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Ellipse refit on the consensus set.
    pub ellipse: Ellipse,
    /// Points within the tolerance of the final ellipse.
    pub num_inliers: usize,
}

// ── Conic helpers ──────────────────────────────────────────────────────────

impl ConicCoeffs {
    /// Algebraic distance of a point (x, y) to this conic.
    pub fn algebraic_distance(&self, x: f64, y: f64) -> f64 {
        let [a, b, c, d, e, f] = self.0;
        a * x * x + b * x * y + c * y * y + d * x + e * y + f
    }

    /// Whether the quadratic part is elliptic (B² − 4AC < 0).
    pub fn is_ellipse(&self) -> bool {
        let [a, b, c, ..] = self.0;
        b * b - 4.0 * a * c < 0.0
    }

    /// Symmetric matrix Q with `[x y 1] Q [x y 1]ᵀ = 0`.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let [a, b, c, d, e, f] = self.0;
        Matrix3::new(
            a,
            0.5 * b,
            0.5 * d,
            0.5 * b,
            c,
            0.5 * e,
            0.5 * d,
            0.5 * e,
            f,
        )
    }

    /// Inverse of [`to_matrix`](Self::to_matrix); the matrix is symmetrized first.
    pub fn from_matrix(q: &Matrix3<f64>) -> Self {
        let off = |i: usize, j: usize| q[(i, j)] + q[(j, i)];
        Self([q[(0, 0)], off(0, 1), q[(1, 1)], off(0, 2), off(1, 2), q[(2, 2)]])
    }

    /// Convert to geometric ellipse parameters, `None` if not a real ellipse.
    pub fn to_ellipse(self) -> Option<Ellipse> {
        conic_to_ellipse(&self)
    }
}

// ── Ellipse utilities ──────────────────────────────────────────────────────

impl Ellipse {
    /// Positive, finite semi-axes and finite center/angle.
    pub fn is_valid(&self) -> bool {
        self.a > 0.0
            && self.b > 0.0
            && self.a.is_finite()
            && self.b.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.angle.is_finite()
    }

    /// Eccentricity in [0, 1).
    pub fn eccentricity(&self) -> f64 {
        let (major, minor) = if self.a >= self.b {
            (self.a, self.b)
        } else {
            (self.b, self.a)
        };
        (1.0 - (minor * minor) / (major * major)).max(0.0).sqrt()
    }

    /// Convert to conic coefficients (normalized so F_center = −1).
    pub fn to_conic(self) -> ConicCoeffs {
        ellipse_to_conic(&self)
    }

    /// Same ellipse with both semi-axes multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            a: self.a * factor,
            b: self.b * factor,
            ..*self
        }
    }

    /// Whether (x, y) lies inside or on the ellipse.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (s, c) = self.angle.sin_cos();
        let dx = x - self.cx;
        let dy = y - self.cy;
        let u = (c * dx + s * dy) / self.a;
        let v = (-s * dx + c * dy) / self.b;
        u * u + v * v <= 1.0
    }

    /// Axis-aligned pixel bounds `[xmin, xmax, ymin, ymax]` of the ellipse.
    pub fn bounds(&self) -> [f64; 4] {
        let (s, c) = self.angle.sin_cos();
        let hx = ((self.a * c).powi(2) + (self.b * s).powi(2)).sqrt();
        let hy = ((self.a * s).powi(2) + (self.b * c).powi(2)).sqrt();
        [self.cx - hx, self.cx + hx, self.cy - hy, self.cy + hy]
    }

    /// Sample `n` points evenly in parameter angle on the boundary.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (sin_a, cos_a) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = std::f64::consts::TAU * (i as f64) / (n as f64);
                let px = self.a * t.cos();
                let py = self.b * t.sin();
                [
                    self.cx + cos_a * px - sin_a * py,
                    self.cy + sin_a * px + cos_a * py,
                ]
            })
            .collect()
    }

    /// First-order geometric distance (Sampson) from a point to the boundary.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        let c = self.to_conic();
        let [ca, cb, cc, cd, ce, _] = c.0;
        let alg = c.algebraic_distance(x, y);
        let gx = 2.0 * ca * x + cb * y + cd;
        let gy = cb * x + 2.0 * cc * y + ce;
        let grad_sq = gx * gx + gy * gy;
        if grad_sq < 1e-30 {
            return alg.abs();
        }
        alg.abs() / grad_sq.sqrt()
    }
}

// ── Conversion: conic ↔ ellipse ────────────────────────────────────────────

/// Convert general conic coefficients to geometric ellipse parameters.
pub fn conic_to_ellipse(conic: &ConicCoeffs) -> Option<Ellipse> {
    if !conic.0.iter().all(|v| v.is_finite()) {
        return None;
    }
    // Work with a positive-definite quadratic part; the curve is sign-invariant.
    let conic = if conic.0[0] + conic.0[2] < 0.0 {
        ConicCoeffs(conic.0.map(|v| -v))
    } else {
        *conic
    };
    let [a, b, c, d, e, _] = conic.0;

    let denom = 4.0 * a * c - b * b;
    if denom <= 0.0 {
        return None;
    }
    if conic.to_matrix().determinant().abs() < 1e-300 {
        return None;
    }

    // Center: gradient of the conic vanishes.
    let cx = (b * e - 2.0 * c * d) / denom;
    let cy = (b * d - 2.0 * a * e) / denom;

    // Conic value at the center; the ellipse is Q(x - c) = -f0.
    let f0 = conic.algebraic_distance(cx, cy);

    // Eigen-decomposition of the 2x2 quadratic part [[a, b/2], [b/2, c]].
    let mean = 0.5 * (a + c);
    let half_diff = (0.25 * (a - c) * (a - c) + 0.25 * b * b).sqrt();
    let lambda_small = mean - half_diff;
    let lambda_large = mean + half_diff;

    let major_sq = -f0 / lambda_small;
    let minor_sq = -f0 / lambda_large;
    if !(major_sq > 0.0 && minor_sq > 0.0) {
        return None;
    }

    // Major axis follows the eigenvector of the smaller eigenvalue.
    let angle = if b.abs() < 1e-300 && (a - c).abs() < 1e-300 {
        0.0
    } else {
        0.5 * b.atan2(a - c) + std::f64::consts::FRAC_PI_2
    };

    let ellipse = Ellipse {
        cx,
        cy,
        a: major_sq.sqrt(),
        b: minor_sq.sqrt(),
        angle: normalize_angle(angle),
    };
    ellipse.is_valid().then_some(ellipse)
}

/// Convert geometric ellipse parameters to general conic coefficients.
pub fn ellipse_to_conic(e: &Ellipse) -> ConicCoeffs {
    let (sin_a, cos_a) = e.angle.sin_cos();
    let inv_a2 = 1.0 / (e.a * e.a);
    let inv_b2 = 1.0 / (e.b * e.b);

    let ca = cos_a * cos_a * inv_a2 + sin_a * sin_a * inv_b2;
    let cb = 2.0 * cos_a * sin_a * (inv_a2 - inv_b2);
    let cc = sin_a * sin_a * inv_a2 + cos_a * cos_a * inv_b2;
    let cd = -2.0 * ca * e.cx - cb * e.cy;
    let ce = -cb * e.cx - 2.0 * cc * e.cy;
    let cf = ca * e.cx * e.cx + cb * e.cx * e.cy + cc * e.cy * e.cy - 1.0;

    ConicCoeffs([ca, cb, cc, cd, ce, cf])
}

/// Wrap an angle into (−π/2, π/2].
pub(crate) fn normalize_angle(angle: f64) -> f64 {
    let pi = std::f64::consts::PI;
    let t = angle.rem_euclid(pi);
    if t > 0.5 * pi {
        t - pi
    } else {
        t
    }
}
