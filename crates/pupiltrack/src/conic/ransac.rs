//! RANSAC wrapper for outlier-robust ellipse fitting.

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::fit::{fit_ellipse_five_point, fit_ellipse_least_squares};
use super::types::{ConicError, Ellipse, RansacConfig, RansacResult};
use super::MIN_SAMPLE;

/// Fit an ellipse robustly using RANSAC.
///
/// Draws `config.iterations` five-point subsets uniformly at random, fits the
/// exact conic through each, and keeps the model with the most points within
/// `config.inlier_tolerance` (Sampson distance). Degenerate subsets are
/// skipped. The winner is refit by least squares on its whole inlier set.
///
/// The RNG is seeded from `config.seed` on every call, so the result is a
/// pure function of `points` and `config`.
pub fn fit_ellipse_ransac(
    points: &[[f64; 2]],
    config: &RansacConfig,
) -> Result<RansacResult, ConicError> {
    let n = points.len();
    if n < MIN_SAMPLE {
        return Err(ConicError::TooFewPoints {
            needed: MIN_SAMPLE,
            got: n,
        });
    }
    let required = config.required_inliers(n);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(usize, Ellipse)> = None;
    let mut sample = [[0.0f64; 2]; MIN_SAMPLE];

    for _ in 0..config.iterations {
        let picked = rand::seq::index::sample(&mut rng, n, MIN_SAMPLE);
        for (slot, idx) in sample.iter_mut().zip(picked.iter()) {
            *slot = points[idx];
        }
        let Some(model) = fit_ellipse_five_point(&sample) else {
            continue;
        };

        let count = count_inliers(&model, points, config.inlier_tolerance);
        if best.map_or(true, |(best_count, _)| count > best_count) {
            best = Some((count, model));
            // Nearly everything agrees: further draws cannot change the consensus much.
            if count * 10 > n * 9 {
                break;
            }
        }
    }

    let (best_count, best_model) = match best {
        Some(b) if b.0 >= required => b,
        other => {
            let found = other.map_or(0, |b| b.0);
            tracing::debug!(found, required, n, "ransac: no consensus");
            return Err(ConicError::InsufficientInliers {
                needed: required,
                found,
            });
        }
    };

    let inliers: Vec<[f64; 2]> = points
        .iter()
        .copied()
        .filter(|&[x, y]| best_model.sampson_distance(x, y) < config.inlier_tolerance)
        .collect();
    let refined = fit_ellipse_least_squares(&inliers).unwrap_or(best_model);
    let num_inliers = count_inliers(&refined, points, config.inlier_tolerance);

    // A refit that lost support is worse than the sampled model.
    let (ellipse, num_inliers) = if num_inliers >= best_count {
        (refined, num_inliers)
    } else {
        (best_model, best_count)
    };

    tracing::trace!(n, num_inliers, "ransac: ellipse accepted");
    Ok(RansacResult {
        ellipse,
        num_inliers,
    })
}

fn count_inliers(model: &Ellipse, points: &[[f64; 2]], tolerance: f64) -> usize {
    points
        .iter()
        .filter(|&&[x, y]| model.sampson_distance(x, y) < tolerance)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn make_test_ellipse() -> Ellipse {
        Ellipse {
            cx: 100.0,
            cy: 80.0,
            a: 30.0,
            b: 15.0,
            angle: 0.3,
        }
    }

    fn config(iterations: usize, tolerance: f64, min_inliers: usize) -> RansacConfig {
        RansacConfig {
            inlier_tolerance: tolerance,
            min_inliers,
            min_inlier_fraction: 0.0,
            iterations,
            seed: 42,
        }
    }

    #[test]
    fn no_outliers() {
        let e = make_test_ellipse();
        let pts = e.sample_points(100);
        let result = fit_ellipse_ransac(&pts, &config(100, 0.1, 6)).expect("clean fit");
        assert_eq!(result.num_inliers, 100);
        assert_relative_eq!(result.ellipse.cx, e.cx, epsilon = 1e-4);
        assert_relative_eq!(result.ellipse.cy, e.cy, epsilon = 1e-4);
        assert_relative_eq!(result.ellipse.a, e.a, epsilon = 1e-4);
        assert_relative_eq!(result.ellipse.b, e.b, epsilon = 1e-4);
    }

    #[test]
    fn forty_percent_outliers() {
        let e = make_test_ellipse();
        let mut pts = e.sample_points(60);
        let mut rng = StdRng::seed_from_u64(999);
        for _ in 0..40 {
            pts.push([rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0)]);
        }
        pts.shuffle(&mut rng);

        let result = fit_ellipse_ransac(&pts, &config(1000, 0.5, 30)).expect("robust fit");
        assert_relative_eq!(result.ellipse.cx, e.cx, epsilon = 0.5);
        assert_relative_eq!(result.ellipse.cy, e.cy, epsilon = 0.5);
        assert_relative_eq!(result.ellipse.a, e.a, epsilon = 0.5);
        assert_relative_eq!(result.ellipse.b, e.b, epsilon = 0.5);
        assert!(result.num_inliers >= 60);
    }

    #[test]
    fn noise_and_outliers() {
        let e = make_test_ellipse();
        let mut pts = e.sample_points(150);
        let mut rng = StdRng::seed_from_u64(777);
        for p in pts.iter_mut() {
            p[0] += rng.gen_range(-0.3..0.3);
            p[1] += rng.gen_range(-0.3..0.3);
        }
        for _ in 0..50 {
            pts.push([rng.gen_range(20.0..180.0), rng.gen_range(20.0..160.0)]);
        }

        let result = fit_ellipse_ransac(&pts, &config(2000, 1.0, 20)).expect("noisy fit");
        assert_relative_eq!(result.ellipse.cx, e.cx, epsilon = 2.0);
        assert_relative_eq!(result.ellipse.cy, e.cy, epsilon = 2.0);
        assert_relative_eq!(result.ellipse.a, e.a, epsilon = 3.0);
        assert_relative_eq!(result.ellipse.b, e.b, epsilon = 3.0);
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let e = make_test_ellipse();
        let mut pts = e.sample_points(40);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            pts.push([rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0)]);
        }
        let cfg = config(300, 0.5, 10);
        let a = fit_ellipse_ransac(&pts, &cfg).unwrap();
        let b = fit_ellipse_ransac(&pts, &cfg).unwrap();
        assert_eq!(a.ellipse, b.ellipse);
        assert_eq!(a.num_inliers, b.num_inliers);
    }

    #[test]
    fn too_few_points() {
        let pts = make_test_ellipse().sample_points(4);
        let err = fit_ellipse_ransac(&pts, &RansacConfig::default()).unwrap_err();
        assert_eq!(err, ConicError::TooFewPoints { needed: 5, got: 4 });
    }

    #[test]
    fn no_consensus_is_an_error_not_a_panic() {
        let mut rng = StdRng::seed_from_u64(11);
        let pts: Vec<[f64; 2]> = (0..60)
            .map(|_| [rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)])
            .collect();
        let cfg = RansacConfig {
            inlier_tolerance: 0.01,
            min_inliers: 30,
            min_inlier_fraction: 0.5,
            iterations: 200,
            seed: 1,
        };
        let err = fit_ellipse_ransac(&pts, &cfg).unwrap_err();
        assert!(matches!(err, ConicError::InsufficientInliers { needed: 30, .. }));
    }

    #[test]
    fn collinear_points_never_fit() {
        let pts: Vec<[f64; 2]> = (0..20).map(|i| [i as f64, 3.0 * i as f64 + 1.0]).collect();
        assert!(fit_ellipse_ransac(&pts, &config(50, 1.0, 5)).is_err());
    }

    #[test]
    fn partial_arc_with_outliers() {
        let e = make_test_ellipse();
        let mut arc: Vec<[f64; 2]> = e
            .sample_points(400)
            .into_iter()
            .filter(|&[_, y]| y > e.cy)
            .collect();
        let mut rng = StdRng::seed_from_u64(333);
        for _ in 0..20 {
            arc.push([rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0)]);
        }
        let result = fit_ellipse_ransac(&arc, &config(1000, 1.0, 10)).expect("arc fit");
        assert_relative_eq!(result.ellipse.cx, e.cx, epsilon = 5.0);
        assert_relative_eq!(result.ellipse.cy, e.cy, epsilon = 5.0);
    }

    #[test]
    fn accepted_model_keeps_the_sampled_support() {
        let e = make_test_ellipse();
        let mut pts = e.sample_points(60);
        // Clump hugging one side of the boundary, just past the tolerance.
        let shell = Ellipse {
            a: e.a + 0.8,
            b: e.b + 0.8,
            ..e
        };
        pts.extend(shell.sample_points(120).into_iter().take(25));

        for seed in 0..20 {
            let cfg = RansacConfig {
                seed,
                ..config(200, 0.5, 10)
            };
            let fit = fit_ellipse_ransac(&pts, &cfg).expect("fit");
            assert_eq!(fit.num_inliers, count_inliers(&fit.ellipse, &pts, 0.5));
            assert!(fit.num_inliers >= 60, "seed {seed}: {}", fit.num_inliers);
        }
    }
}
