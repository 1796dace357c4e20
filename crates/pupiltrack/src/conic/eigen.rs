//! Eigenvector selection for the constrained direct ellipse fit.

use nalgebra::{Matrix3, Vector3};

/// Eigenvector of `system` (= C₁⁻¹ M) whose conic satisfies 4AC − B² > 0.
///
/// `system` is not symmetric in general, so eigenvalues come from the real
/// Schur form; eigenvectors are recovered as null vectors of `system − λI`.
/// When several real eigenpairs pass the constraint (noise-free data can
/// produce near-zero duplicates), the one with the smallest |λ| wins.
pub(crate) fn elliptic_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let scale = system.norm();
    if !scale.is_finite() || scale == 0.0 {
        return None;
    }

    system
        .complex_eigenvalues()
        .iter()
        .filter(|ev| ev.im.abs() <= 1e-9 * scale)
        .filter_map(|ev| {
            let shifted = system - Matrix3::identity() * ev.re;
            let v = null_vector(&shifted)?;
            (4.0 * v[0] * v[2] - v[1] * v[1] > 0.0).then_some((ev.re.abs(), v))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, v)| v)
}

/// Unit null vector of a rank-2 matrix: the largest cross product of two rows.
fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let r0: Vector3<f64> = m.row(0).transpose();
    let r1: Vector3<f64> = m.row(1).transpose();
    let r2: Vector3<f64> = m.row(2).transpose();
    let best = [r0.cross(&r1), r0.cross(&r2), r1.cross(&r2)]
        .into_iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;

    let n = best.norm();
    if !n.is_finite() || n <= 1e-12 * m.norm_squared().max(1e-300) {
        return None;
    }
    Some(best / n)
}
