//! Closed-form conic fits: exact five-point conic and direct least-squares
//! ellipse (Fitzgibbon et al., "Direct Least Square Fitting of Ellipses", 1999).
//!
//! Both fits work on normalized coordinates (centroid at the origin, mean
//! distance √2) and map the conic back with `Q = Tᵀ Q' T`.

use nalgebra::{DMatrix, Matrix3, Matrix6, Vector3, Vector6};

use super::eigen::elliptic_eigenvector;
use super::types::{ConicCoeffs, Ellipse};
use super::MIN_SAMPLE;

/// Similarity transform that conditions a point set for fitting.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Normalization {
    mean_x: f64,
    mean_y: f64,
    scale: f64,
}

impl Normalization {
    pub(crate) fn of(points: &[[f64; 2]]) -> Self {
        let n = points.len().max(1) as f64;
        let mean_x = points.iter().map(|p| p[0]).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p[1]).sum::<f64>() / n;
        let mean_dist = points
            .iter()
            .map(|p| (p[0] - mean_x).hypot(p[1] - mean_y))
            .sum::<f64>()
            / n;
        let scale = if mean_dist > 1e-15 {
            std::f64::consts::SQRT_2 / mean_dist
        } else {
            1.0
        };
        Self {
            mean_x,
            mean_y,
            scale,
        }
    }

    fn apply(&self, p: [f64; 2]) -> [f64; 2] {
        [
            (p[0] - self.mean_x) * self.scale,
            (p[1] - self.mean_y) * self.scale,
        ]
    }

    /// Homogeneous matrix T with `T [x y 1]ᵀ = [x' y' 1]ᵀ`.
    fn matrix(&self) -> Matrix3<f64> {
        let s = self.scale;
        Matrix3::new(
            s,
            0.0,
            -s * self.mean_x,
            0.0,
            s,
            -s * self.mean_y,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Map a conic fitted on normalized points back to frame coordinates.
    fn denormalize(&self, normalized: &ConicCoeffs) -> ConicCoeffs {
        let t = self.matrix();
        ConicCoeffs::from_matrix(&(t.transpose() * normalized.to_matrix() * t))
    }
}

/// Monomials `[x², xy, y², x, y, 1]` of one point.
fn design_row(p: [f64; 2]) -> Vector6<f64> {
    let [x, y] = p;
    Vector6::new(x * x, x * y, y * y, x, y, 1.0)
}

/// Exact conic through five points, `None` for degenerate configurations.
///
/// The coefficient vector spans the null space of the 5×6 design matrix and
/// is obtained as the generalized cross product of its rows (signed 5×5
/// minors).
pub fn fit_conic_five_point(points: &[[f64; 2]]) -> Option<ConicCoeffs> {
    if points.len() != MIN_SAMPLE {
        return None;
    }
    let norm = Normalization::of(points);
    let mut design = DMatrix::<f64>::zeros(5, 6);
    for (i, &p) in points.iter().enumerate() {
        design.set_row(i, &design_row(norm.apply(p)).transpose());
    }

    let mut coeffs = [0.0f64; 6];
    for (k, c) in coeffs.iter_mut().enumerate() {
        let minor = design.clone().remove_column(k).determinant();
        *c = if k % 2 == 0 { minor } else { -minor };
    }
    let magnitude = coeffs.iter().map(|c| c * c).sum::<f64>().sqrt();
    if !magnitude.is_finite() || magnitude < 1e-12 {
        return None;
    }
    for c in &mut coeffs {
        *c /= magnitude;
    }

    let conic = norm.denormalize(&ConicCoeffs(coeffs));
    conic.to_ellipse()?;
    Some(conic)
}

/// Direct least-squares ellipse-specific conic fit. Requires at least 6 points.
pub fn fit_conic_direct(points: &[[f64; 2]]) -> Option<ConicCoeffs> {
    if points.len() < MIN_SAMPLE + 1 {
        return None;
    }
    let norm = Normalization::of(points);

    // Scatter matrix S = Dᵀ D, accumulated row by row.
    let mut s = Matrix6::<f64>::zeros();
    for &p in points {
        let row = design_row(norm.apply(p));
        s += row * row.transpose();
    }

    let s11 = s.fixed_view::<3, 3>(0, 0).into_owned();
    let s12 = s.fixed_view::<3, 3>(0, 3).into_owned();
    let s22 = s.fixed_view::<3, 3>(3, 3).into_owned();
    let s22_inv = s22.try_inverse()?;

    // Reduced scatter matrix for the quadratic coefficients.
    let reduced = s11 - s12 * s22_inv * s12.transpose();
    // Inverse of the constraint matrix C₁ = [[0, 0, 2], [0, −1, 0], [2, 0, 0]].
    let c1_inv = Matrix3::new(0.0, 0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0, 0.0);

    let quad: Vector3<f64> = elliptic_eigenvector(&(c1_inv * reduced))?;
    let lin: Vector3<f64> = -(s22_inv * s12.transpose()) * quad;

    let normalized = ConicCoeffs([quad[0], quad[1], quad[2], lin[0], lin[1], lin[2]]);
    let conic = norm.denormalize(&normalized);
    conic.to_ellipse()?;
    Some(conic)
}

/// Ellipse through exactly five points.
pub fn fit_ellipse_five_point(points: &[[f64; 2]]) -> Option<Ellipse> {
    fit_conic_five_point(points)?.to_ellipse()
}

/// Direct least-squares ellipse over six or more points.
pub fn fit_ellipse_direct(points: &[[f64; 2]]) -> Option<Ellipse> {
    fit_conic_direct(points)?.to_ellipse()
}

/// Best closed-form ellipse for any point count: exact through five points,
/// least squares beyond.
pub fn fit_ellipse_least_squares(points: &[[f64; 2]]) -> Option<Ellipse> {
    match points.len() {
        n if n < MIN_SAMPLE => None,
        MIN_SAMPLE => fit_ellipse_five_point(points),
        _ => fit_ellipse_direct(points),
    }
}

/// RMS Sampson distance of `points` to `ellipse`.
pub fn rms_sampson_distance(ellipse: &Ellipse, points: &[[f64; 2]]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = points
        .iter()
        .map(|&[x, y]| ellipse.sampson_distance(x, y).powi(2))
        .sum();
    (sum_sq / points.len() as f64).sqrt()
}
