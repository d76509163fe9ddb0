//! Fitting and split-sampling loops over the Monte Carlo moves.
//!
//! 1. **Fit** (`T = 1`): walk the likelihood surface and report every
//!    new best `Ltotal` so the caller can checkpoint the model.
//! 2. **Consensus sampling** (`T` usually above 1): after a burn-in,
//!    record the current splits at random steps until enough samples
//!    are collected.
//!
//! Both loops hand a [`StepReport`] to a caller-supplied closure after
//! every move; the closure may fail, which stops the loop.

use crate::dendrogram::Dendrogram;
use crate::error::{HrgError, Result};
use crate::splits::SplitHistogram;
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Temperature of the fitting walk
pub const FIT_TEMPERATURE: f64 = 1.0;

const IMPROVEMENT_TOLERANCE: f64 = 1e-9;

/// Options for fitting a dendrogram by MCMC.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Number of Monte Carlo moves. Default: 100000
    pub num_steps: usize,
    /// Random seed. Default: 42
    pub seed: u64,
    /// Log a status line every this many moves. Default: 4096
    pub report_every: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            num_steps: 100_000,
            seed: 42,
            report_every: 4096,
        }
    }
}

impl FitOptions {
    /// Random generator seeded from `seed`
    pub fn rng(&self) -> SmallRng {
        SmallRng::seed_from_u64(self.seed)
    }
}

/// Options for sampling splits toward a consensus dendrogram.
#[derive(Debug, Clone)]
pub struct ConsensusOptions {
    /// Number of split samples to record. Default: 10000
    pub num_samples: usize,
    /// Metropolis temperature. Default: 2.0
    pub temperature: f64,
    /// Random seed. Default: 42
    pub seed: u64,
    /// Log a status line every this many moves. Default: 4096
    pub report_every: usize,
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        ConsensusOptions {
            num_samples: 10_000,
            temperature: 2.0,
            seed: 42,
            report_every: 4096,
        }
    }
}

impl ConsensusOptions {
    /// Random generator seeded from `seed`
    pub fn rng(&self) -> SmallRng {
        SmallRng::seed_from_u64(self.seed)
    }
}

/// When to record splits during consensus sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingSchedule {
    /// Moves to run before the first sample
    pub burn_in: usize,
    /// Chance of sampling after each move once burn-in is over
    pub probability: f64,
}

impl SamplingSchedule {
    /// Burn-in of `200 n` moves, then sample with probability `1 / (50 n)`,
    /// so consecutive samples are about `50 n` moves apart.
    pub fn for_graph(num_nodes: usize) -> Self {
        let n = num_nodes.max(1);
        SamplingSchedule {
            burn_in: 200 * n,
            probability: 1.0 / (50 * n) as f64,
        }
    }

    /// Whether to sample after `steps` completed moves.
    pub fn should_sample<R: Rng + ?Sized>(&self, steps: usize, rng: &mut R) -> bool {
        steps > self.burn_in && rng.random::<f64>() < self.probability
    }
}

/// What one Monte Carlo step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Moves completed so far, this one included
    pub iteration: usize,
    /// Whether the move was taken
    pub accepted: bool,
    /// Likelihood change of the proposal (accepted or not)
    pub delta_loglik: f64,
    /// `Ltotal` after the step
    pub loglik: f64,
    /// Best `Ltotal` seen so far
    pub best_loglik: f64,
    /// The step reached a new best `Ltotal`
    pub improved: bool,
}

/// Totals of a finished fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSummary {
    /// Moves attempted
    pub num_steps: usize,
    /// Moves taken
    pub num_accepted: usize,
    /// Best `Ltotal` seen, the starting state included
    pub best_loglik: f64,
    /// Iteration at which `best_loglik` was reached
    pub best_iteration: usize,
    /// `Ltotal` after the last move
    pub final_loglik: f64,
}

/// Drives Monte Carlo moves and keeps running metrics.
#[derive(Debug, Clone)]
pub struct McmcRunner {
    iteration: usize,
    num_accepted: usize,
    best_loglik: f64,
    best_iteration: usize,
}

impl McmcRunner {
    /// Start tracking from the dendrogram's current state.
    pub fn new(dendrogram: &Dendrogram) -> Self {
        McmcRunner {
            iteration: 0,
            num_accepted: 0,
            best_loglik: dendrogram.loglik(),
            best_iteration: 0,
        }
    }

    /// One Monte Carlo move at `temperature`.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        dendrogram: &mut Dendrogram,
        temperature: f64,
        rng: &mut R,
    ) -> Result<StepReport> {
        let accepted = dendrogram.monte_carlo_move(temperature, rng)?;
        self.iteration += 1;
        if accepted {
            self.num_accepted += 1;
        }

        let loglik = dendrogram.loglik();
        let improved = loglik > self.best_loglik + IMPROVEMENT_TOLERANCE;
        if improved {
            self.best_loglik = loglik;
            self.best_iteration = self.iteration;
        }

        Ok(StepReport {
            iteration: self.iteration,
            accepted,
            delta_loglik: dendrogram.delta_loglik(),
            loglik,
            best_loglik: self.best_loglik,
            improved,
        })
    }

    /// Moves attempted so far
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Moves taken so far
    pub fn num_accepted(&self) -> usize {
        self.num_accepted
    }

    /// Fraction of moves taken so far
    pub fn acceptance_rate(&self) -> f64 {
        if self.iteration == 0 {
            return 0.0;
        }
        self.num_accepted as f64 / self.iteration as f64
    }

    /// Best `Ltotal` seen so far
    pub fn best_loglik(&self) -> f64 {
        self.best_loglik
    }

    /// Iteration at which the best `Ltotal` was reached (0: the start)
    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }
}

/// Fit `dendrogram` by `options.num_steps` moves at `T = 1`.
///
/// `on_step` sees every step; a step with `improved` set leaves the
/// dendrogram at its best state so far.
pub fn fit<R, E, F>(
    dendrogram: &mut Dendrogram,
    options: &FitOptions,
    rng: &mut R,
    mut on_step: F,
) -> std::result::Result<FitSummary, E>
where
    R: Rng + ?Sized,
    E: From<HrgError>,
    F: FnMut(&StepReport, &Dendrogram) -> std::result::Result<(), E>,
{
    let mut runner = McmcRunner::new(dendrogram);

    info!(
        "fit: n={}, edges={}, steps={}, initial L={:.6}",
        dendrogram.num_leaves(),
        dendrogram.graph().num_edges(),
        options.num_steps,
        dendrogram.loglik()
    );

    for _ in 0..options.num_steps {
        let report = runner.step(dendrogram, FIT_TEMPERATURE, rng)?;
        on_step(&report, dendrogram)?;

        if options.report_every > 0 && report.iteration % options.report_every == 0 {
            info!(
                "[{}] L={:.6} best={:.6} (at {}) accepted={:.3}",
                report.iteration,
                report.loglik,
                report.best_loglik,
                runner.best_iteration(),
                runner.acceptance_rate()
            );
        }
    }

    let summary = FitSummary {
        num_steps: runner.iteration(),
        num_accepted: runner.num_accepted(),
        best_loglik: runner.best_loglik(),
        best_iteration: runner.best_iteration(),
        final_loglik: dendrogram.loglik(),
    };
    info!(
        "fit done: best L={:.6} at step {}, final L={:.6}, accepted {}/{}",
        summary.best_loglik,
        summary.best_iteration,
        summary.final_loglik,
        summary.num_accepted,
        summary.num_steps
    );
    Ok(summary)
}

/// Run moves at `options.temperature` until `options.num_samples` more
/// split samples are recorded, and return the dendrogram's histogram.
///
/// `on_step` sees every step, after the split sample (if any) of that
/// step has been recorded.
pub fn sample_consensus<R, E, F>(
    dendrogram: &mut Dendrogram,
    options: &ConsensusOptions,
    schedule: &SamplingSchedule,
    rng: &mut R,
    mut on_step: F,
) -> std::result::Result<SplitHistogram, E>
where
    R: Rng + ?Sized,
    E: From<HrgError>,
    F: FnMut(&StepReport, &Dendrogram) -> std::result::Result<(), E>,
{
    if !(options.temperature.is_finite() && options.temperature > 0.0) {
        return Err(HrgError::Validation(format!(
            "temperature must be finite and positive, got {}",
            options.temperature
        ))
        .into());
    }
    if options.num_samples > 0 && !(schedule.probability > 0.0) {
        return Err(HrgError::Validation(format!(
            "sampling probability must be positive, got {}",
            schedule.probability
        ))
        .into());
    }

    let target = dendrogram.num_samples() + options.num_samples as u64;
    let mut runner = McmcRunner::new(dendrogram);

    info!(
        "consensus sampling: n={}, T={}, samples={}, burn-in={}, p={:.3e}",
        dendrogram.num_leaves(),
        options.temperature,
        options.num_samples,
        schedule.burn_in,
        schedule.probability
    );

    while dendrogram.num_samples() < target {
        let report = runner.step(dendrogram, options.temperature, rng)?;
        if schedule.should_sample(report.iteration, rng) {
            dendrogram.sample_splits()?;
        }
        on_step(&report, dendrogram)?;

        if options.report_every > 0 && report.iteration % options.report_every == 0 {
            info!(
                "[{}] L={:.6} samples={}/{} accepted={:.3}",
                report.iteration,
                report.loglik,
                dendrogram.num_samples(),
                target,
                runner.acceptance_rate()
            );
        }
    }

    info!(
        "consensus sampling done: {} samples over {} moves, {} distinct splits",
        dendrogram.num_samples(),
        runner.iteration(),
        dendrogram.split_histogram().len()
    );
    Ok(dendrogram.split_histogram().clone())
}
