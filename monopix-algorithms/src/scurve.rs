//! Threshold and noise from injection scans.
//!
//! The occupancy of a pixel versus injected charge follows an s-curve,
//! `f(x) = A/2 * erfc((mu - x) / (sqrt(2) * sigma))`, with `A` the number of
//! injections. `mu` is the threshold and `sigma` the noise. Each pixel is
//! fitted independently with Levenberg-Marquardt.

use std::f64::consts::{PI, SQRT_2};

use monopix_core::{Error, Result};
use ndarray::{Array2, ArrayView1, ArrayView3, Axis};
use rayon::prelude::*;
use statrs::function::erf::erfc;

/// Value of unfitted pixels in the output maps.
pub const FIT_SENTINEL: f64 = -1.0;

const MAX_ITERATIONS: usize = 200;
const INITIAL_LAMBDA: f64 = 1e-3;
const MAX_LAMBDA: f64 = 1e12;
const TOLERANCE: f64 = 1e-12;

/// S-curve model value.
#[inline]
#[must_use]
pub fn scurve(x: f64, amplitude: f64, mu: f64, sigma: f64) -> f64 {
    0.5 * amplitude * erfc((mu - x) / (SQRT_2 * sigma))
}

/// Fit result of one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScurveFit {
    pub threshold: f64,
    pub noise: f64,
    /// Chi-square per degree of freedom.
    pub chi2_ndf: f64,
}

/// Per-pixel maps `[col][row]`, [`FIT_SENTINEL`] where no fit was possible.
#[derive(Debug, Clone, PartialEq)]
pub struct ScurveMaps {
    pub threshold: Array2<f64>,
    pub noise: Array2<f64>,
    pub chi2: Array2<f64>,
    /// Pixels left at the sentinel.
    pub failed: usize,
}

/// Estimates `(mu, sigma)` from the curve area.
fn initial_guess(x: &[f64], y: &[f64], amplitude: f64) -> (f64, f64) {
    let n = x.len();
    let step = (x[n - 1] - x[0]) / (n - 1) as f64;
    let area: f64 = y.iter().sum();
    let mu = x[n - 1] - step * (area / amplitude - 0.5);

    let below: f64 = x
        .iter()
        .zip(y)
        .filter(|(&xi, _)| xi < mu)
        .map(|(_, &yi)| yi)
        .sum();
    let missing_above: f64 = x
        .iter()
        .zip(y)
        .filter(|(&xi, _)| xi > mu)
        .map(|(_, &yi)| amplitude - yi)
        .sum();
    let sigma = step * (below + missing_above) / amplitude * (PI / 2.0).sqrt();
    let sigma = if sigma.is_finite() && sigma > 0.0 {
        sigma
    } else {
        step * 0.5
    };
    (mu, sigma)
}

fn chi2(x: &[f64], y: &[f64], amplitude: f64, mu: f64, sigma: f64) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = yi - scurve(xi, amplitude, mu, sigma);
            r * r
        })
        .sum()
}

/// Fits one s-curve. `x` must be ascending.
///
/// Returns `None` when fewer than two bins are non-zero, when the fit does
/// not converge, or when the result is not finite or outside the scanned
/// range.
#[must_use]
pub fn fit_scurve(x: &[f64], y: &[f64], amplitude: f64) -> Option<ScurveFit> {
    if x.len() != y.len() || x.len() < 3 || amplitude <= 0.0 {
        return None;
    }
    if y.iter().filter(|&&v| v != 0.0).count() < 2 {
        return None;
    }
    let span = x[x.len() - 1] - x[0];
    if span <= 0.0 {
        return None;
    }

    let (mut mu, mut sigma) = initial_guess(x, y, amplitude);
    let mut current = chi2(x, y, amplitude, mu, sigma);
    let mut lambda = INITIAL_LAMBDA;
    let mut converged = false;

    for _ in 0..MAX_ITERATIONS {
        // Normal equations J^T J and J^T r for (mu, sigma).
        let (mut a11, mut a12, mut a22, mut g1, mut g2) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&xi, &yi) in x.iter().zip(y) {
            let u = (mu - xi) / (SQRT_2 * sigma);
            let gauss = (-u * u).exp();
            let d_mu = -amplitude * gauss / ((2.0 * PI).sqrt() * sigma);
            let d_sigma = amplitude * u * gauss / (PI.sqrt() * sigma);
            let r = yi - scurve(xi, amplitude, mu, sigma);
            a11 += d_mu * d_mu;
            a12 += d_mu * d_sigma;
            a22 += d_sigma * d_sigma;
            g1 += d_mu * r;
            g2 += d_sigma * r;
        }

        let mut accepted = false;
        while lambda < MAX_LAMBDA {
            let b11 = a11 * (1.0 + lambda);
            let b22 = a22 * (1.0 + lambda);
            let det = b11 * b22 - a12 * a12;
            if det.abs() < f64::MIN_POSITIVE {
                lambda *= 10.0;
                continue;
            }
            let delta_mu = (b22 * g1 - a12 * g2) / det;
            let delta_sigma = (b11 * g2 - a12 * g1) / det;
            let (new_mu, new_sigma) = (mu + delta_mu, sigma + delta_sigma);
            if new_sigma > 0.0 {
                let candidate = chi2(x, y, amplitude, new_mu, new_sigma);
                if candidate.is_finite() && candidate <= current {
                    let improvement = current - candidate;
                    mu = new_mu;
                    sigma = new_sigma;
                    current = candidate;
                    lambda = (lambda / 10.0).max(1e-12);
                    accepted = true;
                    if improvement <= TOLERANCE * (1.0 + current) {
                        converged = true;
                    }
                    break;
                }
            }
            lambda *= 10.0;
        }
        if !accepted {
            // No step lowers chi2 any more: at a minimum.
            converged = true;
        }
        if converged {
            break;
        }
    }

    let ndf = (x.len() - 2) as f64;
    let fit = ScurveFit {
        threshold: mu,
        noise: sigma,
        chi2_ndf: current / ndf,
    };
    let in_range = fit.threshold >= x[0] - span
        && fit.threshold <= x[x.len() - 1] + span
        && fit.noise > 0.0
        && fit.noise <= span;
    (converged && in_range && fit.chi2_ndf.is_finite()).then_some(fit)
}

fn fit_pixel(levels: &[(f64, usize)], counts: ArrayView1<'_, u32>, amplitude: f64) -> Option<ScurveFit> {
    let x: Vec<f64> = levels.iter().map(|&(level, _)| level).collect();
    let y: Vec<f64> = levels
        .iter()
        .map(|&(_, index)| f64::from(counts[index]))
        .collect();
    fit_scurve(&x, &y, amplitude)
}

/// Fits every pixel of an occupancy histogram `[col][row][scan_param]`.
///
/// `injection_levels[i]` is the injected charge of scan parameter `i`; the
/// levels may come in any order. Pixels are fitted in parallel.
///
/// # Errors
/// Returns [`Error::LengthMismatch`] if the number of levels differs from the
/// scan parameter axis, and [`Error::ConfigError`] for non-positive
/// `n_injections`.
pub fn fit_scurves(
    occupancy: ArrayView3<'_, u32>,
    injection_levels: &[f64],
    n_injections: f64,
) -> Result<ScurveMaps> {
    let (n_cols, n_rows, n_params) = occupancy.dim();
    if injection_levels.len() != n_params {
        return Err(Error::LengthMismatch {
            what: "injection levels",
            expected: n_params,
            actual: injection_levels.len(),
        });
    }
    if n_injections <= 0.0 || !n_injections.is_finite() {
        return Err(Error::ConfigError(format!(
            "n_injections must be positive, got {n_injections}"
        )));
    }

    let mut levels: Vec<(f64, usize)> = injection_levels
        .iter()
        .copied()
        .enumerate()
        .map(|(index, level)| (level, index))
        .collect();
    levels.sort_by(|a, b| a.0.total_cmp(&b.0));

    let fits: Vec<Option<ScurveFit>> = (0..n_cols * n_rows)
        .into_par_iter()
        .map(|pixel| {
            let counts = occupancy
                .index_axis(Axis(0), pixel / n_rows)
                .index_axis_move(Axis(0), pixel % n_rows);
            fit_pixel(&levels, counts, n_injections)
        })
        .collect();

    let mut maps = ScurveMaps {
        threshold: Array2::from_elem((n_cols, n_rows), FIT_SENTINEL),
        noise: Array2::from_elem((n_cols, n_rows), FIT_SENTINEL),
        chi2: Array2::from_elem((n_cols, n_rows), FIT_SENTINEL),
        failed: 0,
    };
    for (pixel, fit) in fits.into_iter().enumerate() {
        let idx = [pixel / n_rows, pixel % n_rows];
        match fit {
            Some(fit) => {
                maps.threshold[idx] = fit.threshold;
                maps.noise[idx] = fit.noise;
                maps.chi2[idx] = fit.chi2_ndf;
            }
            None => maps.failed += 1,
        }
    }
    log::debug!(
        "fitted {} of {} pixels",
        n_cols * n_rows - maps.failed,
        n_cols * n_rows
    );
    Ok(maps)
}
