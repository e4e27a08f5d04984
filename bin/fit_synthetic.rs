use asteria_lm::core::CoreError;
use asteria_lm::models::ResidualModel;
use asteria_lm::{
    AsteriaError, AsteriaResult, CosineFitter, CrossMatch, Gaussian2dFitter, GeoCalFitter,
    LevenbergMarquardt, LevenbergMarquardtConfig, LinearSolverType, PinholeIntrinsics,
    PolynomialFitter, init_logger,
};
use clap::Parser;
use nalgebra::{DVector, UnitQuaternion, dvector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::{info, warn};
use web_time::Instant;

#[derive(Parser)]
#[command(name = "fit_synthetic")]
#[command(about = "Fit the bundled models to synthetic noisy data and report the statistics")]
struct Args {
    /// Model to fit: "polynomial", "cosine", "gaussian", "geocal", or "all"
    #[arg(short, long, default_value = "all")]
    model: String,

    /// Number of synthetic samples for the curve models
    #[arg(short = 'n', long, default_value = "50")]
    points: usize,

    /// Standard deviation of the added Gaussian noise, in data units
    #[arg(long, default_value = "0.1")]
    noise: f64,

    /// Seed for the noise generator
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Maximum number of iterations, rejected steps included
    #[arg(short = 'i', long, default_value = "100")]
    max_iterations: usize,

    /// Relative chi-square change below which a fit is converged
    #[arg(long, default_value = "1e-8")]
    exit_tolerance: f64,

    /// Linear solver: "cholesky" or "qr"
    #[arg(long, default_value = "cholesky")]
    linear_solver: String,

    /// Also propagate the data covariance into the parameter covariance
    #[arg(long)]
    propagate: bool,

    /// Log every iteration at info level
    #[arg(short, long)]
    verbose: bool,
}

struct FitReport {
    model: String,
    parameters: usize,
    observations: usize,
    initial_chi2: f64,
    final_chi2: f64,
    reduced_chi2: f64,
    iterations: usize,
    time_ms: f64,
    status: String,
    max_error: f64,
}

fn format_summary_table(reports: &[FitReport]) {
    info!("Final summary table:");
    info!(
        "{:<10} | {:<3} | {:<5} | {:<12} | {:<12} | {:<9} | {:<5} | {:<9} | {:<22} | {:<12}",
        "Model",
        "M",
        "N",
        "Init Chi2",
        "Final Chi2",
        "Red Chi2",
        "Iters",
        "Time(ms)",
        "Status",
        "Max |dP|/P"
    );
    info!("{}", "-".repeat(130));
    for report in reports {
        info!(
            "{:<10} | {:<3} | {:<5} | {:<12.6e} | {:<12.6e} | {:<9.4} | {:<5} | {:<9.2} | {:<22} | {:<12.3e}",
            report.model,
            report.parameters,
            report.observations,
            report.initial_chi2,
            report.final_chi2,
            report.reduced_chi2,
            report.iterations,
            report.time_ms,
            report.status,
            report.max_error
        );
    }
    info!("{}", "-".repeat(130));

    let converged = reports.iter().filter(|r| r.status == "Converged").count();
    info!("Summary: {}/{} fits converged", converged, reports.len());
}

fn build_config(args: &Args) -> AsteriaResult<LevenbergMarquardtConfig> {
    let linear_solver_type = match args.linear_solver.to_lowercase().as_str() {
        "cholesky" => LinearSolverType::Cholesky,
        "qr" => LinearSolverType::QR,
        other => {
            return Err(CoreError::InvalidInput(format!(
                "Unknown linear solver: {other}. Valid options: cholesky, qr"
            ))
            .log()
            .into());
        }
    };
    let config = LevenbergMarquardtConfig::new()
        .with_linear_solver_type(linear_solver_type)
        .with_max_iterations(args.max_iterations)
        .with_exit_tolerance(args.exit_tolerance);
    config.validate()?;
    Ok(config)
}

fn noise_source(args: &Args) -> AsteriaResult<Normal<f64>> {
    Normal::new(0.0, args.noise).map_err(|e| {
        AsteriaError::from(
            CoreError::InvalidInput(format!("noise level {}", args.noise)).log_with_source(e),
        )
    })
}

/// Largest relative deviation of the fitted parameters from the truth.
fn max_relative_error(fitted: &DVector<f64>, truth: &DVector<f64>) -> f64 {
    fitted
        .iter()
        .zip(truth.iter())
        .map(|(p, t)| if *t == 0.0 { p.abs() } else { ((p - t) / t).abs() })
        .fold(0.0, f64::max)
}

/// Fit, log the statistics and return the summary row.
#[allow(clippy::too_many_arguments)]
fn run_fit<R: ResidualModel>(
    name: &str,
    model: R,
    data: DVector<f64>,
    variance: DVector<f64>,
    start: DVector<f64>,
    truth: &DVector<f64>,
    config: LevenbergMarquardtConfig,
    args: &Args,
) -> AsteriaResult<FitReport> {
    info!("Fitting {} model", name);
    let mut solver = LevenbergMarquardt::with_config(model, config)?;
    solver.set_data(data)?;
    solver.set_variance(variance)?;
    solver.set_parameters(start)?;

    let fit_start = Instant::now();
    let summary = solver.fit(args.max_iterations, args.verbose)?;
    let time_ms = fit_start.elapsed().as_secs_f64() * 1000.0;

    info!("Fitted parameters: {}", solver.parameters().transpose());
    info!("True parameters:   {}", truth.transpose());
    match solver.statistics() {
        Ok(statistics) => info!("\n{}", statistics),
        Err(e) => warn!("Direct covariance unavailable for {}: {}", name, e.chain_compact()),
    }

    if args.propagate {
        let propagate_start = Instant::now();
        let covariance = solver.fourth_order_covariance()?;
        let sigma = covariance.diagonal().map(f64::sqrt);
        info!(
            "Propagated standard errors ({:.1}ms): {}",
            propagate_start.elapsed().as_secs_f64() * 1000.0,
            sigma.transpose()
        );
    }

    Ok(FitReport {
        model: name.to_string(),
        parameters: solver.num_parameters(),
        observations: solver.num_observations(),
        initial_chi2: summary.initial_chi2,
        final_chi2: summary.final_chi2,
        reduced_chi2: solver.reduced_chi2()?,
        iterations: summary.iterations,
        time_ms,
        status: summary.status.to_string(),
        max_error: max_relative_error(solver.parameters(), truth),
    })
}

fn fit_polynomial(args: &Args, rng: &mut StdRng) -> AsteriaResult<FitReport> {
    let truth = dvector![0.8, -1.5, 0.6, 0.25];
    let noise = noise_source(args)?;
    let x: Vec<f64> = (0..args.points)
        .map(|i| -2.0 + 4.0 * i as f64 / args.points.saturating_sub(1).max(1) as f64)
        .collect();
    let data = DVector::from_iterator(
        x.len(),
        x.iter()
            .map(|x| PolynomialFitter::evaluate(&truth, *x) + noise.sample(rng)),
    );
    let fitter = PolynomialFitter::new(x, truth.len() - 1)?;
    let variance = DVector::from_element(args.points, args.noise * args.noise);
    let start = DVector::zeros(truth.len());
    run_fit(
        "polynomial",
        fitter,
        data,
        variance,
        start,
        &truth,
        build_config(args)?,
        args,
    )
}

fn fit_cosine(args: &Args, rng: &mut StdRng) -> AsteriaResult<FitReport> {
    let truth = dvector![10.0, 1.3];
    let noise = noise_source(args)?;
    let t: Vec<f64> = (0..args.points).map(|i| 0.1 * i as f64).collect();
    let data = DVector::from_iterator(
        t.len(),
        t.iter()
            .map(|t| truth[0] * (truth[1] * t).cos() + noise.sample(rng)),
    );
    let fitter = CosineFitter::new(t)?;
    let variance = DVector::from_element(args.points, args.noise * args.noise);
    let start = &truth * 1.1;
    run_fit(
        "cosine",
        fitter,
        data,
        variance,
        start,
        &truth,
        build_config(args)?,
        args,
    )
}

fn fit_gaussian(args: &Args, rng: &mut StdRng) -> AsteriaResult<FitReport> {
    let (width, height) = (48, 48);
    let truth = dvector![800.0, 23.4, 24.7, 2.1, 1.6, 35.0];
    // Pixel noise scales with the configured noise relative to the peak.
    let noise = Normal::new(0.0, args.noise * 20.0).map_err(|e| {
        AsteriaError::from(
            CoreError::InvalidInput(format!("noise level {}", args.noise)).log_with_source(e),
        )
    })?;

    let mut image = vec![0.0; width * height];
    for row in 0..height {
        for col in 0..width {
            let dx = col as f64 - truth[1];
            let dy = row as f64 - truth[2];
            image[row * width + col] = truth[0]
                * (-(dx * dx / (2.0 * truth[3] * truth[3]) + dy * dy / (2.0 * truth[4] * truth[4])))
                    .exp()
                + truth[5]
                + noise.sample(rng);
        }
    }

    let (fitter, stamp) = Gaussian2dFitter::from_stamp(&image, width, height, 23, 25, 7)?;
    let start = fitter.estimate_parameters(&stamp)?;
    let sigma = args.noise * 20.0;
    let variance = DVector::from_element(fitter.num_pixels(), sigma * sigma);
    run_fit(
        "gaussian",
        fitter,
        stamp,
        variance,
        start,
        &truth,
        build_config(args)?,
        args,
    )
}

fn fit_geocal(args: &Args, rng: &mut StdRng) -> AsteriaResult<FitReport> {
    let (gmst, lon, lat) = (4.1, -0.0523, 0.9163);
    let q_true = UnitQuaternion::from_euler_angles(0.35, -0.15, 1.9);
    let k_true = PinholeIntrinsics {
        fx: 1050.0,
        fy: 1040.0,
        cx: 640.0,
        cy: 480.0,
    };
    // Centroiding noise in pixels.
    let noise = noise_source(args)?;

    let mut matches = Vec::new();
    for row in 0..6 {
        for col in 0..8 {
            let u = 60.0 + 165.0 * col as f64;
            let v = 50.0 + 170.0 * row as f64;
            let (ra, dec) = GeoCalFitter::back_project(&q_true, &k_true, u, v, gmst, lon, lat);
            matches.push(CrossMatch {
                u: u + noise.sample(rng),
                v: v + noise.sample(rng),
                ra,
                dec,
            });
        }
    }

    let fitter = GeoCalFitter::new(matches, gmst, lon, lat)?;
    let data = fitter.observations();
    let variance = DVector::from_element(data.len(), args.noise * args.noise);
    let q_start = q_true * UnitQuaternion::from_euler_angles(0.01, 0.01, -0.01);
    let k_start = PinholeIntrinsics {
        fx: 1000.0,
        fy: 1000.0,
        cx: 620.0,
        cy: 500.0,
    };
    let truth = GeoCalFitter::pack_parameters(&q_true, &k_true);
    run_fit(
        "geocal",
        fitter,
        data,
        variance,
        GeoCalFitter::pack_parameters(&q_start, &k_start),
        &truth,
        build_config(args)?,
        args,
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let models: Vec<&str> = match args.model.to_lowercase().as_str() {
        "all" => vec!["polynomial", "cosine", "gaussian", "geocal"],
        "polynomial" => vec!["polynomial"],
        "cosine" => vec!["cosine"],
        "gaussian" => vec!["gaussian"],
        "geocal" => vec!["geocal"],
        other => {
            return Err(format!(
                "Unknown model: {other}. Valid options: polynomial, cosine, gaussian, geocal, all"
            )
            .into());
        }
    };

    let mut reports = Vec::new();
    for model in models {
        let result = match model {
            "polynomial" => fit_polynomial(&args, &mut rng),
            "cosine" => fit_cosine(&args, &mut rng),
            "gaussian" => fit_gaussian(&args, &mut rng),
            _ => fit_geocal(&args, &mut rng),
        };
        match result {
            Ok(report) => reports.push(report),
            Err(e) => warn!("{} fit failed: {}", model, e.chain()),
        }
    }

    format_summary_table(&reports);
    Ok(())
}
