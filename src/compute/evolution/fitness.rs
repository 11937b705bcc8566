//! Fitness evaluation for trebuchet topologies.
//!
//! Runs the physics simulation and turns the trajectory into a
//! [`FitnessResult`]: the design's range when it passes every validity
//! check, or zero plus a rejection reason when it does not.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::compute::{
    ConstraintIntegrator, ProjectileTermination, SimulationError, Simulator, Trajectory,
    calculate_peak_load, calculate_range, energy_conserved,
};
use crate::schema::{FitnessResult, RejectionReason, TopologyConfig, ValidityLimits};

/// Scores topologies against the validity limits.
///
/// Evaluation never fails: simulator errors and panics are reported as
/// [`RejectionReason::Exception`].
#[derive(Debug, Clone)]
pub struct FitnessEvaluator<S = ConstraintIntegrator> {
    simulator: S,
    limits: ValidityLimits,
}

impl FitnessEvaluator {
    /// Evaluator backed by the built-in integrator.
    pub fn new(limits: ValidityLimits) -> Self {
        Self::with_simulator(ConstraintIntegrator::default(), limits)
    }
}

impl<S: Simulator> FitnessEvaluator<S> {
    pub fn with_simulator(simulator: S, limits: ValidityLimits) -> Self {
        Self { simulator, limits }
    }

    pub fn limits(&self) -> &ValidityLimits {
        &self.limits
    }

    pub fn simulator(&self) -> &S {
        &self.simulator
    }

    /// Evaluate one topology.
    pub fn evaluate(&self, config: &TopologyConfig) -> FitnessResult {
        let mut config = config.clone();
        config.normalize_constraints();
        let counts = (config.num_particles(), config.num_constraints());

        let outcome = catch_unwind(AssertUnwindSafe(|| self.score(&config)));
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                log::debug!("Evaluation failed: {err}");
                FitnessResult::rejected(RejectionReason::Exception).with_error(err.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::warn!("Evaluation panicked: {message}");
                FitnessResult::rejected(RejectionReason::Exception).with_error(message)
            }
        };
        result.with_counts(counts.0, counts.1)
    }

    fn score(&self, config: &TopologyConfig) -> Result<FitnessResult, SimulationError> {
        config.validate()?;
        let termination = ProjectileTermination::new(config);
        let terminate = |states: &[Vec<f64>]| termination.should_stop(states);
        let Trajectory { states, forces } = self.simulator.simulate(config, &terminate)?;

        if states.is_empty() {
            return Ok(FitnessResult::rejected(RejectionReason::SimulationFailed));
        }

        let range = calculate_range(&states, config);
        if !range.is_finite() || range < 0.0 {
            return Ok(FitnessResult::rejected(RejectionReason::InvalidRange));
        }

        let peak_load = calculate_peak_load(&forces);
        if peak_load > self.limits.max_force {
            return Ok(FitnessResult::rejected(RejectionReason::ForceExceeded)
                .with_measurements(range, peak_load));
        }

        if !energy_conserved(&states, &config.particles, self.limits.energy_tolerance) {
            return Ok(FitnessResult::rejected(RejectionReason::EnergyNotConserved)
                .with_measurements(range, peak_load));
        }

        Ok(FitnessResult::accepted(
            range,
            peak_load,
            config.num_particles(),
            config.num_constraints(),
        ))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
