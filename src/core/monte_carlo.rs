//! Monte Carlo portfolio simulation.
//!
//! Paths are mutually independent: each path derives its own generator seed
//! from the request seed and the path index, so results do not depend on how
//! rayon partitions the work and a fixed seed reproduces the summary exactly.

use std::f64::consts::PI;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::info;

use super::error::Result;
use super::types::{MonteCarloRequest, MonteCarloSummary};

struct PathOutcome {
    terminal_value: f64,
    first_failure_year: Option<u32>,
    shortfall: f64,
    trace: Option<Vec<f64>>,
}

/// Runs the requested simulation and aggregates the per-path outcomes.
pub fn run_monte_carlo(request: &MonteCarloRequest) -> Result<MonteCarloSummary> {
    request.validate()?;

    let started = Instant::now();
    let deadline = request.deadline_ms.map(Duration::from_millis);

    let mut outcomes: Vec<(u32, PathOutcome)> = (0..request.num_simulations)
        .into_par_iter()
        .filter_map(|path_index| {
            if let Some(limit) = deadline {
                // Paths already running finish; unstarted ones are dropped.
                if started.elapsed() >= limit {
                    return None;
                }
            }
            Some((path_index, simulate_path(request, path_index)))
        })
        .collect();
    outcomes.sort_by_key(|(path_index, _)| *path_index);

    let num_paths = outcomes.len() as u32;
    let partial = num_paths < request.num_simulations;

    let mut terminal_values: Vec<f64> = outcomes
        .iter()
        .map(|(_, outcome)| outcome.terminal_value)
        .collect();
    let mut failure_years: Vec<f64> = outcomes
        .iter()
        .filter_map(|(_, outcome)| outcome.first_failure_year.map(f64::from))
        .collect();
    let successes = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.first_failure_year.is_none())
        .count();
    let max_shortfall = outcomes
        .iter()
        .map(|(_, outcome)| outcome.shortfall)
        .fold(0.0, f64::max);
    let sample_paths: Vec<Vec<f64>> = outcomes
        .iter_mut()
        .filter_map(|(_, outcome)| outcome.trace.take())
        .collect();

    let success_rate = if num_paths == 0 {
        0.0
    } else {
        successes as f64 / num_paths as f64
    };
    let median_first_failure_year = if failure_years.is_empty() {
        None
    } else {
        Some(percentile(&mut failure_years, 50.0).round() as u32)
    };

    let summary = MonteCarloSummary {
        num_paths,
        requested_paths: request.num_simulations,
        success_rate,
        median_final_value: percentile(&mut terminal_values, 50.0),
        percentile5: percentile(&mut terminal_values, 5.0),
        percentile10: percentile(&mut terminal_values, 10.0),
        percentile90: percentile(&mut terminal_values, 90.0),
        percentile95: percentile(&mut terminal_values, 95.0),
        median_first_failure_year,
        max_shortfall,
        execution_time_ms: started.elapsed().as_millis() as u64,
        partial,
        sample_paths,
    };

    info!(
        paths = summary.num_paths,
        success_rate = summary.success_rate,
        partial = summary.partial,
        elapsed_ms = summary.execution_time_ms,
        "simulation complete"
    );
    Ok(summary)
}

fn simulate_path(request: &MonteCarloRequest, path_index: u32) -> PathOutcome {
    let mut rng = Rng::new(derive_seed(request.seed, path_index));
    let record_trace = path_index < request.sample_paths;
    let mut trace = record_trace.then(|| {
        let mut points = Vec::with_capacity(request.years as usize + 1);
        points.push(request.initial_value);
        points
    });

    let mut balance = request.initial_value;
    let mut first_failure_year = None;
    let mut shortfall = 0.0;

    for year in 1..=request.years {
        let annual_return =
            request.expected_return + request.volatility * rng.standard_normal();
        balance *= 1.0 + annual_return;
        balance += request.annual_contribution;
        balance -= request.annual_withdrawal;
        if balance < 0.0 {
            shortfall += -balance;
            balance = 0.0;
        }
        if balance <= 0.0 && first_failure_year.is_none() {
            first_failure_year = Some(year);
        }
        if let Some(points) = trace.as_mut() {
            points.push(balance);
        }
    }

    PathOutcome {
        terminal_value: balance,
        first_failure_year,
        shortfall,
        trace,
    }
}

fn derive_seed(base_seed: u64, path_index: u32) -> u64 {
    // The base seed is hashed before mixing in the shifted path index;
    // otherwise nearby seeds would produce the same set of path seeds in a
    // different order, which permutation-invariant aggregates cannot see.
    splitmix64(splitmix64(base_seed) ^ ((path_index as u64) << 32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        let z0 = r * theta.cos();
        let z1 = r * theta.sin();
        self.cached_normal = Some(z1);
        z0
    }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
