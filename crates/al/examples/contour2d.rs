//! Contour localization on a synthetic two-fidelity 2-d benchmark.
//!
//! The low-fidelity function is a smooth radial bowl, the high-fidelity
//! one adds an oscillatory correction; both are observed under Gaussian
//! noise. Hyperparameters are trained on an initial random design, the
//! learner then restarts from an empty dataset and adaptively samples
//! until the contour at level 39 is localized.
//!
//! Run with `RUST_LOG=info cargo run --example contour2d`.

use mfal_al::{AlConfig, ContourLearner, Region, classify_grid};
use mfal_gp::MultiFidelityGp;
use ndarray::{Array2, array};
use ndarray_rand::RandomExt;
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use rand_xoshiro::Xoshiro256Plus;

const THRESHOLD: f64 = 39.;
const NOISE_LO: f64 = 0.4;
const NOISE_HI: f64 = 0.2;

fn f_lo(x: &Array2<f64>, rng: &mut impl Rng) -> Array2<f64> {
    let mut y = Array2::zeros((x.nrows(), 1));
    for (i, row) in x.rows().into_iter().enumerate() {
        let r = (0.5 * (row[0] * row[0] + row[1] * row[1])).sqrt();
        let noise: f64 = rng.sample(StandardNormal);
        y[[i, 0]] = 20. * (-0.2 * r).exp() + 20. + std::f64::consts::E + NOISE_LO * noise;
    }
    y
}

fn f_hi(x: &Array2<f64>, rng: &mut impl Rng) -> Array2<f64> {
    let mut y = f_lo(x, rng);
    for (i, row) in x.rows().into_iter().enumerate() {
        let arg = 0.5
            * ((2. * std::f64::consts::PI * row[0]).cos()
                + (2. * std::f64::consts::PI * row[1]).cos());
        let noise: f64 = rng.sample(StandardNormal);
        y[[i, 0]] += arg.exp() + NOISE_HI * noise;
    }
    y
}

fn random_design(xlimits: &Array2<f64>, n: usize, rng: &mut impl Rng) -> Array2<f64> {
    let mut x = Array2::random_using((n, xlimits.nrows()), Uniform::new(0., 1.), rng);
    for (j, bounds) in xlimits.rows().into_iter().enumerate() {
        let (lo, up) = (bounds[0], bounds[1]);
        x.column_mut(j).mapv_inplace(|u| lo + u * (up - lo));
    }
    x
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let xlimits = array![[-3., 3.], [-3., 3.]];
    let mut rng = Xoshiro256Plus::seed_from_u64(1234);

    // initial design: 50 low- and 50 high-fidelity samples
    let x_lo = random_design(&xlimits, 50, &mut rng);
    let x_hi = random_design(&xlimits, 50, &mut rng);
    let y_lo = f_lo(&x_lo, &mut rng);
    let y_hi = f_hi(&x_hi, &mut rng);

    let mut model = MultiFidelityGp::new(&x_lo, &y_lo, &x_hi, &y_hi)?;
    let report = model.train()?;
    println!(
        "training: nlml {:.3} -> {:.3} in {} iterations (converged: {})",
        report.initial_nlml, report.final_nlml, report.iterations, report.converged
    );
    let hyp = model.hyperparams();
    println!(
        "trained hyperparameters: rho {:.3}, discrepancy variance {:.3}, noise {:.4}/{:.4}",
        hyp.rho, hyp.scale_hi, hyp.noise_lo, hyp.noise_hi
    );

    let theta_path = std::env::temp_dir().join("contour2d-theta.txt");
    mfal_gp::save_theta(&theta_path, model.theta())?;
    println!("hyperparameters saved to {}", theta_path.display());

    // restart from an empty dataset, keeping the trained hyperparameters
    let empty_x = Array2::zeros((0, 2));
    let empty_y = Array2::zeros((0, 1));
    let theta = mfal_gp::load_theta(&theta_path)?;
    let mut model = MultiFidelityGp::new(&empty_x, &empty_y, &empty_x, &empty_y)?;
    model.set_theta(theta)?;

    let mut rng_lo = Xoshiro256Plus::seed_from_u64(1);
    let mut rng_hi = Xoshiro256Plus::seed_from_u64(2);
    let config = AlConfig::new(THRESHOLD, xlimits.clone());
    let outcome = {
        let mut learner = ContourLearner::new(
            &mut model,
            |x: &Array2<f64>| f_lo(x, &mut rng_lo),
            |x: &Array2<f64>| f_hi(x, &mut rng_hi),
            config,
        )?;
        learner.run(&mut rng)?
    };

    for record in &outcome.rounds {
        println!(
            "round {}: c {:.3}, {} low / {} high points, max variance {:.4}",
            record.round, record.c, record.n_lo_new, record.n_hi_new, record.max_var
        );
    }
    println!(
        "finished after {} rounds (converged: {}), final max variance {:.4}",
        outcome.rounds.len(),
        outcome.converged,
        outcome.final_max_var
    );
    println!(
        "dataset: {} low-fidelity / {} high-fidelity evaluations",
        model.n_lo(),
        model.n_hi()
    );

    let c = outcome.rounds.last().map_or(1., |r| r.c);
    let map = classify_grid(&model, &xlimits, 50, THRESHOLD, c)?;
    let above = map.labels.iter().filter(|&&l| l == Region::Above).count();
    let below = map.labels.iter().filter(|&&l| l == Region::Below).count();
    println!(
        "grid classification: {above} above, {below} below, {} undecided ({:.1}% decided)",
        map.labels.len() - above - below,
        100. * map.decided_fraction()
    );
    Ok(())
}
