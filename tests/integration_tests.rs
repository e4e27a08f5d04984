//! Integration tests for asteria-lm
//!
//! End-to-end fits of every bundled fitter against synthetic data with known
//! noise, plus the solver-level guarantees the fitters rely on.
//!
//! # Test Coverage
//!
//! - **Linear problems**: agreement with closed-form weighted least squares,
//!   reduced chi-square calibration over repeated noisy trials, propagated
//!   covariance against the direct estimator
//! - **Nonlinear problems**: cosine curve, 2-D Gaussian stamp, camera calibration
//! - **Solver behaviour**: damping bookkeeping, degenerate models, covariance
//!   validation, observer notification
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test integration_tests
//! cargo test --test integration_tests --features parallel
//! ```

use asteria_lm::core::CoreError;
use asteria_lm::models::ResidualModel;
use asteria_lm::models::gaussian2d::{SIGMA_X, SIGMA_Y, X0, Y0};
use asteria_lm::{
    AsteriaError, CosineFitter, CrossMatch, Gaussian2dFitter, GeoCalFitter, LevenbergMarquardt,
    LevenbergMarquardtConfig, LinearSolverType, OptimizationStatus, ParameterHistory,
    PinholeIntrinsics, PolynomialFitter,
};
use nalgebra::{DMatrix, DVector, UnitQuaternion, dmatrix, dvector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// `y = a·x`, the smallest model with a closed-form weighted solution.
struct Proportional {
    x: Vec<f64>,
}

impl ResidualModel for Proportional {
    fn num_parameters(&self) -> usize {
        1
    }

    fn num_observations(&self) -> usize {
        self.x.len()
    }

    fn model(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.x.len(), self.x.iter().map(|x| params[0] * x))
    }

    fn jacobian(&self, _params: &DVector<f64>) -> Option<DMatrix<f64>> {
        Some(DMatrix::from_column_slice(self.x.len(), 1, &self.x))
    }
}

/// Cosine model without its analytic Jacobian.
struct NumericCosine(CosineFitter);

impl ResidualModel for NumericCosine {
    fn num_parameters(&self) -> usize {
        self.0.num_parameters()
    }

    fn num_observations(&self) -> usize {
        self.0.num_observations()
    }

    fn model(&self, params: &DVector<f64>) -> DVector<f64> {
        self.0.model(params)
    }
}

/// `y = a·x + 0·b`: the second parameter is invisible to the data.
struct Unconstrained {
    x: Vec<f64>,
}

impl ResidualModel for Unconstrained {
    fn num_parameters(&self) -> usize {
        2
    }

    fn num_observations(&self) -> usize {
        self.x.len()
    }

    fn model(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.x.len(), self.x.iter().map(|x| params[0] * x))
    }

    fn jacobian(&self, _params: &DVector<f64>) -> Option<DMatrix<f64>> {
        Some(DMatrix::from_fn(self.x.len(), 2, |i, j| {
            if j == 0 { self.x[i] } else { 0.0 }
        }))
    }
}

fn cosine_times() -> Vec<f64> {
    (0..50).map(|i| 0.1 * f64::from(i)).collect()
}

/// Exact cosine samples with a fixed ±σ pattern added.
fn cosine_data(a: f64, omega: f64, sigma: f64) -> DVector<f64> {
    let t = cosine_times();
    DVector::from_iterator(
        t.len(),
        t.iter().enumerate().map(|(i, t)| {
            let sign = if (i * 37 + 11) % 7 < 3 { -1.0 } else { 1.0 };
            a * (omega * t).cos() + sign * sigma
        }),
    )
}

/// Site and sidereal time of the calibration scenes: (GMST, longitude, latitude).
const GEOCAL_SITE: (f64, f64, f64) = (2.71, 0.1745, 0.7854);

fn geocal_camera() -> (UnitQuaternion<f64>, PinholeIntrinsics) {
    (
        UnitQuaternion::from_euler_angles(-0.4, 0.25, 2.0),
        PinholeIntrinsics {
            fx: 1200.0,
            fy: 1185.0,
            cx: 640.0,
            cy: 360.0,
        },
    )
}

/// A 6×5 grid of stars imaged exactly by the given camera.
fn geocal_matches(q: &UnitQuaternion<f64>, k: &PinholeIntrinsics) -> Vec<CrossMatch> {
    let (gmst, lon, lat) = GEOCAL_SITE;
    let mut matches = Vec::new();
    for row in 0..5 {
        for col in 0..6 {
            let u = 80.0 + 220.0 * f64::from(col);
            let v = 60.0 + 150.0 * f64::from(row);
            let (ra, dec) = GeoCalFitter::back_project(q, k, u, v, gmst, lon, lat);
            matches.push(CrossMatch { u, v, ra, dec });
        }
    }
    matches
}

fn relative_error(actual: f64, expected: f64) -> f64 {
    ((actual - expected) / expected).abs()
}

#[test]
fn test_linear_fit_matches_weighted_least_squares() -> TestResult {
    let x = vec![0.5, 1.0, 1.5, 2.0, 3.0, 4.5];
    let y = dvector![1.4, 2.1, 3.3, 3.8, 6.4, 8.7];
    let variance = dvector![0.04, 0.01, 0.09, 0.01, 0.25, 0.04];

    // a = Σ(x·y/σ²) / Σ(x²/σ²)
    let (num, den) = x
        .iter()
        .zip(y.iter())
        .zip(variance.iter())
        .fold((0.0, 0.0), |(num, den), ((x, y), v)| {
            (num + x * y / v, den + x * x / v)
        });
    let expected = num / den;

    let mut solver = LevenbergMarquardt::new(Proportional { x })?;
    solver.set_data(y)?;
    solver.set_variance(variance)?;
    solver.set_parameters(dvector![0.0])?;
    solver.fit(100, false)?;

    assert!(relative_error(solver.parameters()[0], expected) < 1e-9);

    // Direct covariance of a linear fit: reduced χ² / Σ(x²/σ²)
    let covariance = solver.parameter_covariance()?;
    let expected_variance = solver.reduced_chi2()? / den;
    assert!(relative_error(covariance[(0, 0)], expected_variance) < 1e-9);
    Ok(())
}

#[test]
fn test_analytic_and_numeric_jacobians_agree() -> TestResult {
    let data = cosine_data(10.0, 1.3, 0.1);
    let variance = DVector::from_element(50, 0.01);
    let config = LevenbergMarquardtConfig::new().with_h(1e-4);

    let mut analytic = LevenbergMarquardt::with_config(CosineFitter::new(cosine_times())?, config.clone())?;
    analytic.set_data(data.clone())?;
    analytic.set_variance(variance.clone())?;
    analytic.set_parameters(dvector![11.0, 1.43])?;
    analytic.fit(200, false)?;

    let numeric_model = NumericCosine(CosineFitter::new(cosine_times())?);
    let mut numeric = LevenbergMarquardt::with_config(numeric_model, config)?;
    numeric.set_data(data)?;
    numeric.set_variance(variance)?;
    numeric.set_parameters(dvector![11.0, 1.43])?;
    numeric.fit(200, false)?;

    for j in 0..2 {
        assert!(relative_error(numeric.parameters()[j], analytic.parameters()[j]) < 1e-6);
    }
    assert!(relative_error(numeric.chi2()?, analytic.chi2()?) < 1e-8);
    Ok(())
}

#[test]
fn test_reduced_chi2_is_calibrated_over_trials() -> TestResult {
    let x: Vec<f64> = (0..20).map(|i| -1.0 + 0.1 * f64::from(i)).collect();
    let truth = dvector![0.5, -1.2, 2.0];
    let sigma = 0.1;
    let normal = Normal::new(0.0, sigma)?;
    let mut rng = StdRng::seed_from_u64(2024);

    let config = LevenbergMarquardtConfig::new().with_exit_tolerance(1e-10);
    let mut solver = LevenbergMarquardt::with_config(PolynomialFitter::new(x.clone(), 2)?, config)?;
    solver.set_variance(DVector::from_element(x.len(), sigma * sigma))?;

    let trials = 200;
    let mut total = 0.0;
    for _ in 0..trials {
        let y = DVector::from_iterator(
            x.len(),
            x.iter()
                .map(|x| PolynomialFitter::evaluate(&truth, *x) + normal.sample(&mut rng)),
        );
        solver.set_data(y)?;
        solver.set_parameters(dvector![0.0, 0.0, 0.0])?;
        solver.fit(50, false)?;
        total += solver.reduced_chi2()?;
    }

    let mean = total / f64::from(trials);
    assert!((0.9..=1.1).contains(&mean), "mean reduced chi2 {mean}");
    Ok(())
}

#[test]
fn test_diagonal_and_full_covariance_agree() -> TestResult {
    let x: Vec<f64> = (0..12).map(f64::from).collect();
    let y = DVector::from_iterator(
        12,
        x.iter()
            .enumerate()
            .map(|(i, x)| 3.0 - 0.4 * x + 0.05 * x * x + if i % 2 == 0 { 0.2 } else { -0.2 }),
    );
    let variance = DVector::from_fn(12, |i, _| 0.04 + 0.01 * i as f64);

    let mut diagonal = LevenbergMarquardt::new(PolynomialFitter::new(x.clone(), 2)?)?;
    diagonal.set_data(y.clone())?;
    diagonal.set_variance(variance.clone())?;
    diagonal.set_parameters(dvector![1.0, 0.0, 0.0])?;
    diagonal.fit(200, false)?;

    let mut full = LevenbergMarquardt::new(PolynomialFitter::new(x, 2)?)?;
    full.set_data(y)?;
    full.set_covariance(DMatrix::from_diagonal(&variance))?;
    full.set_parameters(dvector![1.0, 0.0, 0.0])?;
    full.fit(200, false)?;

    for j in 0..3 {
        assert!((diagonal.parameters()[j] - full.parameters()[j]).abs() < 1e-10);
    }
    assert!(relative_error(full.chi2()?, diagonal.chi2()?) < 1e-10);

    let direct_diagonal = diagonal.parameter_covariance()?;
    let direct_full = full.parameter_covariance()?;
    assert!((direct_diagonal - direct_full).norm() < 1e-10);
    Ok(())
}

#[test]
fn test_refit_from_solution_is_idempotent() -> TestResult {
    let mut solver = LevenbergMarquardt::new(CosineFitter::new(cosine_times())?)?;
    solver.set_data(cosine_data(10.0, 1.3, 0.1))?;
    solver.set_variance(DVector::from_element(50, 0.01))?;
    solver.set_parameters(dvector![11.0, 1.43])?;
    solver.fit(200, false)?;

    let first = solver.parameters().clone();
    let first_chi2 = solver.chi2()?;

    solver.fit(200, false)?;
    for j in 0..2 {
        assert!(relative_error(solver.parameters()[j], first[j]) < 1e-9);
    }
    assert!(solver.chi2()? <= first_chi2);
    Ok(())
}

#[test]
fn test_damping_changes_by_exactly_the_boost_factor() -> TestResult {
    let config = LevenbergMarquardtConfig::new().with_boost_shrink_factor(4.0);
    let mut solver = LevenbergMarquardt::with_config(CosineFitter::new(cosine_times())?, config)?;
    solver.set_data(cosine_data(10.0, 1.3, 0.1))?;
    solver.set_variance(DVector::from_element(50, 0.01))?;
    solver.set_parameters(dvector![11.0, 1.43])?;
    let summary = solver.fit(200, false)?;

    assert!(summary.accepted_steps > 0);
    assert!(summary.rejected_steps > 0);
    assert_eq!(
        summary.iteration_history[0].damping_before,
        summary.initial_damping
    );
    for stats in &summary.iteration_history {
        if stats.accepted {
            assert_eq!(stats.damping_after, stats.damping_before / 4.0);
            assert!(stats.trial_chi2 < stats.chi2);
        } else {
            assert_eq!(stats.damping_after, stats.damping_before * 4.0);
        }
    }
    for pair in summary.iteration_history.windows(2) {
        assert_eq!(pair[1].damping_before, pair[0].damping_after);
        assert!(pair[1].chi2 <= pair[0].chi2);
    }
    assert_eq!(
        summary.final_damping,
        summary.iteration_history[summary.iterations - 1].damping_after
    );
    Ok(())
}

#[test]
fn test_minimum_degrees_of_freedom() -> TestResult {
    let mut solver = LevenbergMarquardt::new(PolynomialFitter::new(vec![0.0, 1.0, 2.0], 1)?)?;
    assert_eq!(solver.degrees_of_freedom(), 1);
    solver.set_data(dvector![0.9, 3.2, 4.9])?;
    solver.set_variance(dvector![0.01, 0.01, 0.01])?;
    solver.set_parameters(dvector![0.0, 0.0])?;
    solver.fit(100, false)?;

    let statistics = solver.statistics()?;
    assert_eq!(statistics.degrees_of_freedom, 1);
    assert!(statistics.reduced_chi2.is_finite());
    assert!(statistics.covariance.iter().all(|c| c.is_finite()));
    assert!(statistics.standard_errors.iter().all(|s| s.is_finite() && *s > 0.0));
    Ok(())
}

#[test]
fn test_too_few_observations_is_a_configuration_error() -> TestResult {
    let result = LevenbergMarquardt::new(PolynomialFitter::new(vec![0.0, 1.0], 1)?);
    assert!(matches!(
        result,
        Err(AsteriaError::Core(CoreError::InsufficientDegreesOfFreedom {
            observations: 2,
            parameters: 2
        }))
    ));

    let result = LevenbergMarquardt::new(PolynomialFitter::new(vec![0.0, 1.0], 3)?);
    assert!(result.is_err());
    Ok(())
}

#[test]
fn test_cosine_scenario() -> TestResult {
    // With the default 1e-32 tolerance a noisy fit ends on the damping limit after a
    // tail of rejected roundoff-level steps; a practical tolerance ends it as converged.
    let config = LevenbergMarquardtConfig::new().with_exit_tolerance(1e-4);
    let mut solver = LevenbergMarquardt::with_config(CosineFitter::new(cosine_times())?, config)?;
    solver.set_data(cosine_data(10.0, 1.3, 0.1))?;
    solver.set_variance(DVector::from_element(50, 0.01))?;
    solver.set_parameters(dvector![11.0, 1.43])?;

    let summary = solver.fit(100, false)?;

    assert_eq!(summary.status, OptimizationStatus::Converged);
    assert!(summary.iterations < 50);
    assert!(summary.final_chi2 < summary.initial_chi2);
    assert!(relative_error(solver.parameters()[0], 10.0) < 0.01);
    assert!(relative_error(solver.parameters()[1], 1.3) < 0.01);

    let reduced = solver.reduced_chi2()?;
    assert!((0.5..=1.5).contains(&reduced), "reduced chi2 {reduced}");
    Ok(())
}

#[test]
fn test_qr_and_cholesky_backends_agree() -> TestResult {
    let mut results = Vec::new();
    for solver_type in [LinearSolverType::Cholesky, LinearSolverType::QR] {
        let config = LevenbergMarquardtConfig::new().with_linear_solver_type(solver_type);
        let mut solver =
            LevenbergMarquardt::with_config(CosineFitter::new(cosine_times())?, config)?;
        solver.set_data(cosine_data(10.0, 1.3, 0.1))?;
        solver.set_variance(DVector::from_element(50, 0.01))?;
        solver.set_parameters(dvector![11.0, 1.43])?;
        solver.fit(200, false)?;
        results.push(solver.parameters().clone());
    }
    assert!((&results[0] - &results[1]).norm() < 1e-8);
    Ok(())
}

#[test]
fn test_unconstrained_parameter_reaches_damping_limit() -> TestResult {
    let x: Vec<f64> = (1..=6).map(f64::from).collect();
    let y = DVector::from_iterator(6, x.iter().map(|x| 2.0 * x));
    let mut solver = LevenbergMarquardt::new(Unconstrained { x })?;
    solver.set_data(y)?;
    solver.set_variance(DVector::from_element(6, 0.01))?;
    solver.set_parameters(dvector![1.0, 5.0])?;

    let summary = solver.fit(100, false)?;

    assert_eq!(summary.status, OptimizationStatus::DampingLimitReached);
    assert_eq!(summary.accepted_steps, 0);
    assert!(summary.final_damping > summary.damping_limit);
    assert_eq!(solver.parameters(), &dvector![1.0, 5.0]);
    assert!(solver.parameter_covariance().is_err());
    Ok(())
}

#[test]
fn test_covariance_that_is_not_positive_definite_is_rejected() -> TestResult {
    let mut solver = LevenbergMarquardt::new(PolynomialFitter::new(vec![0.0, 1.0, 2.0], 1)?)?;

    let indefinite = dmatrix![1.0, 2.0, 0.0; 2.0, 1.0, 0.0; 0.0, 0.0, 1.0];
    assert!(matches!(
        solver.set_covariance(indefinite),
        Err(AsteriaError::Core(CoreError::InvalidCovariance(_)))
    ));

    assert!(solver.set_variance(dvector![0.1, 0.0, 0.1]).is_err());
    assert!(solver.data_covariance().is_none());
    Ok(())
}

#[test]
fn test_propagated_covariance_matches_direct_for_linear_model() -> TestResult {
    let x: Vec<f64> = (0..8).map(f64::from).collect();
    let normal = Normal::new(0.0, 0.2)?;
    let mut rng = StdRng::seed_from_u64(7);
    let y = DVector::from_iterator(
        8,
        x.iter().map(|x| 1.5 + 0.7 * x + normal.sample(&mut rng)),
    );

    let mut solver = LevenbergMarquardt::new(PolynomialFitter::new(x, 1)?)?;
    solver.set_data(y)?;
    solver.set_variance(DVector::from_element(8, 0.04))?;
    solver.set_parameters(dvector![0.0, 0.0])?;
    solver.fit(100, false)?;

    // The direct estimator is scaled by reduced χ², propagation is not.
    let direct = solver.parameter_covariance()? / solver.reduced_chi2()?;
    let propagated = solver.fourth_order_covariance()?;
    let scale = direct.abs().max();
    assert!((&propagated - &direct).abs().max() < 1e-6 * scale);

    let dpdx = solver.jacobian_dpdx()?;
    assert_eq!(dpdx.shape(), (8, 2));
    // Each intercept sensitivity column sums to one: shifting all data by c shifts a0 by c
    assert!((dpdx.column(0).sum() - 1.0).abs() < 1e-8);
    assert!(dpdx.column(1).sum().abs() < 1e-8);
    Ok(())
}

#[test]
fn test_cosine_direct_and_propagated_covariance_agree() -> TestResult {
    let mut solver = LevenbergMarquardt::new(CosineFitter::new(cosine_times())?)?;
    solver.set_data(cosine_data(10.0, 1.3, 0.05))?;
    solver.set_variance(DVector::from_element(50, 0.0025))?;
    solver.set_parameters(dvector![10.5, 1.32])?;
    solver.fit(200, false)?;

    let direct = solver.parameter_covariance()? / solver.reduced_chi2()?;
    let propagated = solver.fourth_order_covariance()?;
    let scale = direct.abs().max();
    assert!(
        (&propagated - &direct).abs().max() < 0.05 * scale,
        "direct {direct}, propagated {propagated}"
    );
    assert!(propagated[(0, 0)] > 0.0 && propagated[(1, 1)] > 0.0);
    Ok(())
}

#[test]
fn test_geocal_direct_and_propagated_covariance_agree() -> TestResult {
    let (gmst, lon, lat) = GEOCAL_SITE;
    let (q_true, k_true) = geocal_camera();
    let normal = Normal::new(0.0, 0.5)?;
    let mut rng = StdRng::seed_from_u64(31);
    let matches = geocal_matches(&q_true, &k_true)
        .into_iter()
        .map(|m| CrossMatch {
            u: m.u + normal.sample(&mut rng),
            v: m.v + normal.sample(&mut rng),
            ..m
        })
        .collect();

    let fitter = GeoCalFitter::new(matches, gmst, lon, lat)?;
    let data = fitter.observations();
    let n = data.len();
    let mut solver = LevenbergMarquardt::new(fitter)?;
    solver.set_data(data)?;
    solver.set_variance(DVector::from_element(n, 0.25))?;
    solver.set_parameters(GeoCalFitter::pack_parameters(&q_true, &k_true))?;
    solver.fit(300, false)?;

    let direct = solver.parameter_covariance()? / solver.reduced_chi2()?;
    let propagated = solver.fourth_order_covariance()?;

    // Orientation and intrinsics live on very different scales; compare per block.
    for (start, len) in [(0, 4), (4, 4)] {
        let d = direct.view((start, start), (len, len));
        let p = propagated.view((start, start), (len, len));
        let scale = d.abs().max();
        assert!(scale > 0.0);
        assert!(
            (&p - &d).abs().max() < 0.05 * scale,
            "block at {start}: direct {d}, propagated {p}"
        );
    }

    // No variance along the quaternion itself, and unit-scale quaternion errors stay small.
    let q_hat = solver.parameters().rows(0, 4).into_owned();
    let radial = (q_hat.transpose() * direct.view((0, 0), (4, 4)) * &q_hat)[(0, 0)];
    assert!(radial.abs() < 1e-9 * direct.view((0, 0), (4, 4)).abs().max());
    let sigma = solver.asymptotic_standard_error()?;
    assert!(sigma.rows(0, 4).max() < 5e-3);
    assert!(sigma.rows(4, 4).min() > 0.0);
    Ok(())
}

#[test]
fn test_geocal_recovers_camera_from_synthetic_matches() -> TestResult {
    let (gmst, lon, lat) = GEOCAL_SITE;
    let (q_true, k_true) = geocal_camera();
    let fitter = GeoCalFitter::new(geocal_matches(&q_true, &k_true), gmst, lon, lat)?;
    let data = fitter.observations();
    let n = data.len();

    let q_start = q_true * UnitQuaternion::from_euler_angles(0.01, -0.008, 0.005);
    let k_start = PinholeIntrinsics {
        fx: 1220.0,
        fy: 1160.0,
        cx: 650.0,
        cy: 352.0,
    };

    let mut solver = LevenbergMarquardt::new(fitter)?;
    solver.set_data(data)?;
    solver.set_variance(DVector::from_element(n, 0.25))?;
    solver.set_parameters(GeoCalFitter::pack_parameters(&q_start, &k_start))?;
    let summary = solver.fit(300, false)?;
    assert!(summary.final_chi2 < 1e-6 * summary.initial_chi2);

    let (q_fit, k_fit) = GeoCalFitter::unpack_parameters(solver.parameters())?;
    assert!(q_fit.angle_to(&q_true) < 1e-6);
    assert!((k_fit.fx - k_true.fx).abs() < 1e-3);
    assert!((k_fit.fy - k_true.fy).abs() < 1e-3);
    assert!((k_fit.cx - k_true.cx).abs() < 1e-3);
    assert!((k_fit.cy - k_true.cy).abs() < 1e-3);

    // The quaternion stays normalised after every accepted step.
    assert!((solver.parameters().rows(0, 4).norm() - 1.0).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_gaussian_stamp_fit_recovers_source() -> TestResult {
    let (width, height) = (32, 32);
    let (amplitude, x0, y0, sigma_x, sigma_y, background) = (500.0, 15.3, 16.7, 1.8, 1.4, 20.0);
    let noise = Normal::new(0.0, 2.0)?;
    let mut rng = StdRng::seed_from_u64(99);

    let mut image = vec![0.0; width * height];
    for row in 0..height {
        for col in 0..width {
            let dx = col as f64 - x0;
            let dy = row as f64 - y0;
            let signal = amplitude
                * (-(dx * dx / (2.0 * sigma_x * sigma_x) + dy * dy / (2.0 * sigma_y * sigma_y)))
                    .exp();
            image[row * width + col] = signal + background + noise.sample(&mut rng);
        }
    }

    let (fitter, stamp) = Gaussian2dFitter::from_stamp(&image, width, height, 15, 17, 6)?;
    assert_eq!(fitter.num_pixels(), 169);
    let start = fitter.estimate_parameters(&stamp)?;

    let mut solver = LevenbergMarquardt::new(fitter)?;
    solver.set_data(stamp)?;
    solver.set_variance(DVector::from_element(169, 4.0))?;
    solver.set_parameters(start)?;
    solver.fit(200, false)?;

    let p = solver.parameters();
    assert!((p[X0] - x0).abs() < 0.1);
    assert!((p[Y0] - y0).abs() < 0.1);
    assert!((p[SIGMA_X] - sigma_x).abs() < 0.1);
    assert!((p[SIGMA_Y] - sigma_y).abs() < 0.1);

    let reduced = solver.reduced_chi2()?;
    assert!((0.6..=1.4).contains(&reduced), "reduced chi2 {reduced}");
    Ok(())
}

#[test]
fn test_parameter_history_follows_the_fit() -> TestResult {
    let history = ParameterHistory::new();
    let mut solver = LevenbergMarquardt::new(CosineFitter::new(cosine_times())?)?;
    solver.add_observer(history.clone());
    solver.set_data(cosine_data(10.0, 1.3, 0.1))?;
    solver.set_variance(DVector::from_element(50, 0.01))?;
    solver.set_parameters(dvector![11.0, 1.43])?;
    let summary = solver.fit(200, false)?;

    let entries = history.snapshot()?;
    assert_eq!(entries.len(), summary.iterations);
    assert!(entries.iter().enumerate().all(|(i, e)| e.iteration == i));
    let last = entries.last().ok_or("no iterations recorded")?;
    assert_eq!(&last.parameters, solver.parameters());
    assert_eq!(last.damping, summary.final_damping);

    // Covariance propagation re-fits internally without notifying observers.
    solver.jacobian_dpdx()?;
    assert_eq!(history.snapshot()?.len(), summary.iterations);
    Ok(())
}
