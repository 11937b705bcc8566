//! Post-processing of simulated trajectories.
//!
//! States follow the integrator layout: `2n` position components then `2n`
//! velocity components, x/y interleaved, in screen coordinates (y down). The
//! physical height of a particle is therefore `-y`.

use crate::schema::{Particle, TopologyConfig};

/// Particles farther right than this are ignored when finding the ground.
const GROUND_SEARCH_LIMIT_X: f64 = 2000.0;

/// Arm length factor in the range normalization.
const ARM_LENGTH_FACTOR: f64 = 0.75;

/// Height of particle `i`.
#[inline]
pub fn height(state: &[f64], i: usize) -> f64 {
    -state[2 * i + 1]
}

/// Velocity of particle `i` as `(vx, upward vy)`.
#[inline]
pub fn velocity(state: &[f64], num_particles: usize, i: usize) -> (f64, f64) {
    let base = 2 * num_particles + 2 * i;
    (state[base], -state[base + 1])
}

/// Largest absolute constraint force over every step except the first.
///
/// The first entry is the solve for the initial state, before anything has
/// moved. Logs with one entry or fewer yield 0.
pub fn calculate_peak_load(forces: &[Vec<f64>]) -> f64 {
    forces
        .iter()
        .skip(1)
        .flat_map(|step| step.iter())
        .fold(0.0, |peak: f64, f| peak.max(f.abs()))
}

/// Normalized throwing range of a trajectory.
///
/// Each sample is scored as the ballistic range `2 vy vx` the projectile
/// would reach if released there (unit gravity). The best score is divided by
/// the larger of the pivot's vertical excursion above the lowest particle and
/// three quarters of the pivot-to-tip distance, then scaled by `axleheight`.
pub fn calculate_range(states: &[Vec<f64>], config: &TopologyConfig) -> f64 {
    let n = config.particles.len();
    let axle = &config.particles[config.mainaxle];
    let mut axle_height = -axle.y;
    let mut lowest = -axle.y;
    let mut best = 0.0f64;

    for state in states {
        for i in 0..n {
            if state[2 * i] < GROUND_SEARCH_LIMIT_X {
                lowest = lowest.min(height(state, i));
            }
        }
        axle_height = axle_height.max(height(state, config.mainaxle));

        let (vx, vy) = velocity(state, n, config.projectile);
        best = best.max(2.0 * vy.max(0.0) * vx);
    }

    let excursion = axle_height - lowest;
    let tip = &config.particles[config.armtip];
    let arm_length = (tip.x - axle.x).hypot(tip.y - axle.y);

    best / excursion.max(ARM_LENGTH_FACTOR * arm_length) * config.axleheight
}

/// Kinetic plus potential energy of one state under unit gravity.
pub fn total_energy(state: &[f64], particles: &[Particle]) -> f64 {
    let n = particles.len();
    particles
        .iter()
        .enumerate()
        .map(|(i, particle)| {
            let (vx, vy) = velocity(state, n, i);
            0.5 * particle.mass * (vx * vx + vy * vy) + particle.mass * height(state, i)
        })
        .sum()
}

/// Whether every sample's energy stays within `tolerance * |E0|` of the first.
pub fn energy_conserved(states: &[Vec<f64>], particles: &[Particle], tolerance: f64) -> bool {
    let Some(first) = states.first() else {
        return true;
    };
    let initial = total_energy(first, particles);
    let allowed = tolerance * initial.abs();

    states
        .iter()
        .all(|state| (total_energy(state, particles) - initial).abs() <= allowed)
}

/// Stops a simulation once the projectile comes back down.
///
/// Fires when, between the last two samples, the projectile's height above
/// its launch point or its upward velocity goes from positive to
/// non-positive.
#[derive(Debug, Clone, Copy)]
pub struct ProjectileTermination {
    projectile: usize,
    num_particles: usize,
    launch_height: f64,
}

impl ProjectileTermination {
    pub fn new(config: &TopologyConfig) -> Self {
        let launch_height = config
            .particles
            .get(config.projectile)
            .map_or(0.0, |p| -p.y);
        Self {
            projectile: config.projectile,
            num_particles: config.particles.len(),
            launch_height,
        }
    }

    fn probe(&self, state: &[f64]) -> (f64, f64) {
        let h = height(state, self.projectile) - self.launch_height;
        let (_, vy) = velocity(state, self.num_particles, self.projectile);
        (h, vy)
    }

    pub fn should_stop(&self, states: &[Vec<f64>]) -> bool {
        let [.., previous, current] = states else {
            return false;
        };
        let (h0, v0) = self.probe(previous);
        let (h1, v1) = self.probe(current);
        (h0 > 0.0 && h1 <= 0.0) || (v0 > 0.0 && v1 <= 0.0)
    }
}
