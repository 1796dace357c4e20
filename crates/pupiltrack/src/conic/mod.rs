//! Ellipse / conic fitting primitives.
//!
//! Implements:
//! - Exact five-point conic through a minimal sample.
//! - Direct least-squares conic fit (Fitzgibbon et al., "Direct Least Square Fitting of Ellipses", 1999).
//! - Conversion between general conic coefficients and geometric ellipse parameters.
//! - Sampson residuals and a seeded RANSAC wrapper for outlier-robust fitting.

mod eigen;
mod fit;
mod ransac;
mod types;

/// Points in a RANSAC minimal sample (a conic has five degrees of freedom).
pub const MIN_SAMPLE: usize = 5;

pub use fit::{
    fit_conic_direct, fit_conic_five_point, fit_ellipse_direct, fit_ellipse_five_point,
    fit_ellipse_least_squares, rms_sampson_distance,
};
pub use ransac::fit_ellipse_ransac;
pub use types::{
    conic_to_ellipse, ellipse_to_conic, ConicCoeffs, ConicError, Ellipse, RansacConfig,
    RansacResult,
};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_test_ellipse() -> Ellipse {
        Ellipse {
            cx: 100.0,
            cy: 80.0,
            a: 30.0,
            b: 15.0,
            angle: 0.3,
        }
    }

    #[test]
    fn ellipse_to_conic_roundtrip() {
        let e = make_test_ellipse();
        let c = e.to_conic();
        assert!(c.is_ellipse());
        let e2 = c.to_ellipse().expect("conic converts back");

        assert_relative_eq!(e.cx, e2.cx, epsilon = 1e-10);
        assert_relative_eq!(e.cy, e2.cy, epsilon = 1e-10);
        assert_relative_eq!(e.a, e2.a, epsilon = 1e-10);
        assert_relative_eq!(e.b, e2.b, epsilon = 1e-10);
        assert_relative_eq!(e.angle, e2.angle, epsilon = 1e-10);
    }

    #[test]
    fn conic_matrix_roundtrip_scales_freely() {
        let c = make_test_ellipse().to_conic();
        let q = c.to_matrix() * 3.5;
        let e = ConicCoeffs::from_matrix(&q).to_ellipse().expect("scaled conic");
        assert_relative_eq!(e.cx, 100.0, epsilon = 1e-9);
        assert_relative_eq!(e.a, 30.0, epsilon = 1e-9);

        // Sign flip describes the same curve.
        let neg = ConicCoeffs(c.0.map(|v| -v)).to_ellipse().expect("negated conic");
        assert_relative_eq!(neg.b, 15.0, epsilon = 1e-9);
    }

    #[test]
    fn hyperbola_and_imaginary_ellipse_are_rejected() {
        // x² − y² − 1 = 0
        assert!(ConicCoeffs([1.0, 0.0, -1.0, 0.0, 0.0, -1.0]).to_ellipse().is_none());
        // x² + y² + 1 = 0
        assert!(ConicCoeffs([1.0, 0.0, 1.0, 0.0, 0.0, 1.0]).to_ellipse().is_none());
        // Non-finite coefficients.
        assert!(ConicCoeffs([f64::NAN, 0.0, 1.0, 0.0, 0.0, -1.0]).to_ellipse().is_none());
    }

    #[test]
    fn major_axis_angle_is_normalized() {
        let e = Ellipse {
            cx: 0.0,
            cy: 0.0,
            a: 10.0,
            b: 4.0,
            angle: 2.0,
        };
        let back = e.to_conic().to_ellipse().expect("valid ellipse");
        assert!(back.angle > -std::f64::consts::FRAC_PI_2);
        assert!(back.angle <= std::f64::consts::FRAC_PI_2);
        assert_relative_eq!(back.angle, 2.0 - std::f64::consts::PI, epsilon = 1e-9);
        assert_relative_eq!(back.a, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn algebraic_distance_on_ellipse() {
        let e = make_test_ellipse();
        let c = e.to_conic();
        for [x, y] in e.sample_points(100) {
            assert!(c.algebraic_distance(x, y).abs() < 1e-10);
        }
    }

    #[test]
    fn sampson_distance_vanishes_on_boundary() {
        let e = make_test_ellipse();
        for [x, y] in e.sample_points(50) {
            assert!(e.sampson_distance(x, y) < 1e-8);
        }
        assert!(e.sampson_distance(e.cx, e.cy) > 1.0);

        // Roughly geometric near the boundary.
        let circle = Ellipse {
            cx: 0.0,
            cy: 0.0,
            a: 20.0,
            b: 20.0,
            angle: 0.0,
        };
        assert_relative_eq!(circle.sampson_distance(21.0, 0.0), 1.0, epsilon = 0.05);
        assert!(rms_sampson_distance(&e, &e.sample_points(100)) < 1e-8);
    }

    #[test]
    fn containment_and_bounds() {
        let e = Ellipse {
            cx: 50.0,
            cy: 40.0,
            a: 20.0,
            b: 10.0,
            angle: 0.0,
        };
        assert!(e.contains(50.0, 40.0));
        assert!(e.contains(69.0, 40.0));
        assert!(!e.contains(50.0, 51.0));
        let [xmin, xmax, ymin, ymax] = e.bounds();
        assert_relative_eq!(xmin, 30.0, epsilon = 1e-12);
        assert_relative_eq!(xmax, 70.0, epsilon = 1e-12);
        assert_relative_eq!(ymin, 30.0, epsilon = 1e-12);
        assert_relative_eq!(ymax, 50.0, epsilon = 1e-12);

        let rotated = Ellipse {
            angle: std::f64::consts::FRAC_PI_2,
            ..e
        };
        let [_, _, ymin, ymax] = rotated.bounds();
        assert_relative_eq!(ymax - ymin, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn eccentricity_and_scaling() {
        let circle = Ellipse {
            cx: 0.0,
            cy: 0.0,
            a: 5.0,
            b: 5.0,
            angle: 0.0,
        };
        assert_relative_eq!(circle.eccentricity(), 0.0);
        let e = Ellipse {
            a: 10.0,
            b: 6.0,
            ..circle
        };
        assert_relative_eq!(e.eccentricity(), 0.8, epsilon = 1e-12);
        let s = e.scaled(0.5);
        assert_relative_eq!(s.a, 5.0);
        assert_relative_eq!(s.eccentricity(), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn required_inliers_takes_the_strictest_bound() {
        let cfg = RansacConfig {
            min_inliers: 10,
            min_inlier_fraction: 0.5,
            ..RansacConfig::default()
        };
        assert_eq!(cfg.required_inliers(100), 50);
        assert_eq!(cfg.required_inliers(8), 10);
        let loose = RansacConfig {
            min_inliers: 0,
            min_inlier_fraction: 0.0,
            ..RansacConfig::default()
        };
        assert_eq!(loose.required_inliers(100), MIN_SAMPLE);
    }
}
