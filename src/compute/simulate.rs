//! Constrained multi-body integration.
//!
//! Particles move under unit gravity (+y in screen space) while rods, pins
//! and sliders are enforced through Lagrange multipliers. Each derivative
//! evaluation solves `J M^-1 J^T lambda = b` for the constraint forces.

use crate::schema::{TopologyConfig, TopologyError};

use super::linalg::{LinalgError, SolverScratch, solve_in_place};

/// Rods shorter than this cannot define a direction.
const MIN_ROD_LENGTH: f64 = 1e-9;

/// Output of one simulation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    /// Sampled states: `2n` positions then `2n` velocities, x/y interleaved.
    pub states: Vec<Vec<f64>>,
    /// Per-constraint force magnitudes, one entry per sample.
    pub forces: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Early-stop predicate, called with every sample recorded so far.
pub type Terminate<'a> = &'a dyn Fn(&[Vec<f64>]) -> bool;

/// Physics backend used by the fitness evaluator.
///
/// Implementations must be deterministic: the same config and predicate
/// always produce the same trajectory.
pub trait Simulator: Send + Sync {
    fn simulate(
        &self,
        config: &TopologyConfig,
        terminate: Terminate<'_>,
    ) -> Result<Trajectory, SimulationError>;
}

/// Simulation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("Invalid topology: {0}")]
    Topology(#[from] TopologyError),
    #[error("{0} constraints are not supported by this integrator")]
    UnsupportedConstraint(&'static str),
    #[error("Rod between particles {p1} and {p2} has zero length")]
    DegenerateRod { p1: usize, p2: usize },
    #[error("Slider on particle {p} has a zero normal")]
    DegenerateSlider { p: usize },
    #[error("Constraint system could not be solved: {0}")]
    Solve(#[from] LinalgError),
    #[error("State became non-finite at t = {time}")]
    NonFiniteState { time: f64 },
}

/// Fixed-step RK4 integrator for rod, pin and slider constraints.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintIntegrator {
    /// RK4 steps per recorded sample.
    pub substeps: usize,
}

impl Default for ConstraintIntegrator {
    fn default() -> Self {
        Self { substeps: 4 }
    }
}

impl ConstraintIntegrator {
    pub fn new(substeps: usize) -> Self {
        Self {
            substeps: substeps.max(1),
        }
    }
}

impl Simulator for ConstraintIntegrator {
    fn simulate(
        &self,
        config: &TopologyConfig,
        terminate: Terminate<'_>,
    ) -> Result<Trajectory, SimulationError> {
        config.validate()?;
        let mut system = ConstraintSystem::new(config)?;

        let n = config.particles.len();
        let mut y = Vec::with_capacity(4 * n);
        y.extend(config.particles.iter().flat_map(|p| [p.x, p.y]));
        y.resize(4 * n, 0.0);

        let rows = system.rows.len();
        let mut stepper = Rk4::new(4 * n, rows);

        let mut initial = vec![0.0; rows];
        system.derivative(&y, &mut stepper.k1, &mut initial)?;
        initial.iter_mut().for_each(|f| *f = f.abs());

        let mut trajectory = Trajectory {
            states: vec![y.clone()],
            forces: vec![initial],
        };
        if terminate(&trajectory.states) {
            return Ok(trajectory);
        }

        let substeps = self.substeps.max(1);
        let h = config.timestep / substeps as f64;
        let mut t = config.timestep;
        while t < config.duration {
            let mut peak = vec![0.0; rows];
            for _ in 0..substeps {
                stepper.step(&mut system, &mut y, h, &mut peak)?;
            }
            if y.iter().any(|v| !v.is_finite()) {
                return Err(SimulationError::NonFiniteState { time: t });
            }

            trajectory.states.push(y.clone());
            trajectory.forces.push(peak);
            if terminate(&trajectory.states) {
                break;
            }
            t += config.timestep;
        }

        Ok(trajectory)
    }
}

#[derive(Debug, Clone, Copy)]
enum RowKind {
    Rod { p1: usize, p2: usize },
    Slider { p: usize, nx: f64, ny: f64 },
}

#[derive(Debug, Clone, Copy)]
struct ConstraintRow {
    kind: RowKind,
    oneway: bool,
    released: bool,
}

/// Constraint rows plus the scratch they are solved in.
struct ConstraintSystem {
    rows: Vec<ConstraintRow>,
    inv_mass: Vec<f64>,
    gravity: f64,
    scratch: SolverScratch,
}

impl ConstraintSystem {
    fn new(config: &TopologyConfig) -> Result<Self, SimulationError> {
        let c = &config.constraints;
        if !c.colinear.is_empty() {
            return Err(SimulationError::UnsupportedConstraint("colinear"));
        }
        if !c.f2k.is_empty() {
            return Err(SimulationError::UnsupportedConstraint("f2k"));
        }
        if !c.rope.is_empty() {
            return Err(SimulationError::UnsupportedConstraint("rope"));
        }

        let mut rows = Vec::with_capacity(c.rod.len() + c.slider.len() + 2 * c.pin.len());
        for rod in &c.rod {
            if rod.p1 == rod.p2 {
                return Err(SimulationError::DegenerateRod {
                    p1: rod.p1,
                    p2: rod.p2,
                });
            }
            rows.push(ConstraintRow {
                kind: RowKind::Rod {
                    p1: rod.p1,
                    p2: rod.p2,
                },
                oneway: rod.oneway,
                released: false,
            });
        }
        for slider in &c.slider {
            let normal = slider
                .normal
                .normalized()
                .ok_or(SimulationError::DegenerateSlider { p: slider.p })?;
            rows.push(ConstraintRow {
                kind: RowKind::Slider {
                    p: slider.p,
                    nx: normal.x,
                    ny: normal.y,
                },
                oneway: slider.oneway,
                released: false,
            });
        }
        for pin in &c.pin {
            for (nx, ny) in [(0.0, 1.0), (1.0, 0.0)] {
                rows.push(ConstraintRow {
                    kind: RowKind::Slider { p: pin.p, nx, ny },
                    oneway: false,
                    released: false,
                });
            }
        }

        let inv_mass = config
            .particles
            .iter()
            .flat_map(|p| [1.0 / p.mass, 1.0 / p.mass])
            .collect();

        Ok(Self {
            rows,
            inv_mass,
            gravity: 1.0,
            scratch: SolverScratch::new(),
        })
    }

    /// Time derivative of `y` into `dy`; constraint forces into `forces`.
    ///
    /// The first one-way constraint pulling (positive multiplier) is released
    /// and stops acting from the next evaluation on.
    fn derivative(
        &mut self,
        y: &[f64],
        dy: &mut [f64],
        forces: &mut [f64],
    ) -> Result<(), SimulationError> {
        let cols = self.inv_mass.len();
        let (pos, vel) = y.split_at(cols);
        let active: Vec<usize> = (0..self.rows.len())
            .filter(|&i| !self.rows[i].released)
            .collect();
        let k = active.len();

        let buffers = self.scratch.acquire(k, cols);
        let jac = buffers.jacobian;

        for (r, &idx) in active.iter().enumerate() {
            let row = &mut jac[r * cols..(r + 1) * cols];
            match self.rows[idx].kind {
                RowKind::Rod { p1, p2 } => {
                    let dx = pos[2 * p1] - pos[2 * p2];
                    let dyy = pos[2 * p1 + 1] - pos[2 * p2 + 1];
                    let len = dx.hypot(dyy);
                    if !(len > MIN_ROD_LENGTH) {
                        return Err(SimulationError::DegenerateRod { p1, p2 });
                    }
                    let (ux, uy) = (dx / len, dyy / len);
                    row[2 * p2] = ux;
                    row[2 * p2 + 1] = uy;
                    row[2 * p1] = -ux;
                    row[2 * p1 + 1] = -uy;

                    let vx = vel[2 * p1] - vel[2 * p2];
                    let vy = vel[2 * p1 + 1] - vel[2 * p2 + 1];
                    // Gravity acts equally on both ends, so only the
                    // centripetal term remains.
                    buffers.rhs[r] = (vx * vx + vy * vy) / len;
                }
                RowKind::Slider { p, nx, ny } => {
                    row[2 * p] = nx;
                    row[2 * p + 1] = ny;
                    buffers.rhs[r] = -ny * self.gravity;
                }
            }
        }

        for i in 0..k {
            for j in i..k {
                let mut sum = 0.0;
                for c in 0..cols {
                    let a = jac[i * cols + c];
                    if a != 0.0 {
                        sum += a * jac[j * cols + c] * self.inv_mass[c];
                    }
                }
                buffers.system[i * k + j] = sum;
                buffers.system[j * k + i] = sum;
            }
            if buffers.system[i * k + i] == 0.0 {
                buffers.system[i * k + i] = 1.0;
            }
        }

        solve_in_place(buffers.system, buffers.rhs, k)?;
        let lambda = &*buffers.rhs;

        let acc = buffers.output;
        for c in 0..cols {
            let mut sum = 0.0;
            for r in 0..k {
                sum += jac[r * cols + c] * lambda[r];
            }
            acc[c] = sum * self.inv_mass[c] + if c % 2 == 1 { self.gravity } else { 0.0 };
        }

        dy[..cols].copy_from_slice(vel);
        dy[cols..].copy_from_slice(acc);

        forces.fill(0.0);
        for (r, &idx) in active.iter().enumerate() {
            forces[idx] = lambda[r];
        }
        if let Some(r) = (0..k).find(|&r| self.rows[active[r]].oneway && lambda[r] > 0.0) {
            self.rows[active[r]].released = true;
        }

        Ok(())
    }
}

/// Classic fourth-order Runge-Kutta with reusable stage buffers.
struct Rk4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
    forces: Vec<f64>,
}

impl Rk4 {
    fn new(dim: usize, rows: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
            forces: vec![0.0; rows],
        }
    }

    /// Advance `y` by `h`, folding stage forces into `peak` as magnitudes.
    fn step(
        &mut self,
        system: &mut ConstraintSystem,
        y: &mut [f64],
        h: f64,
        peak: &mut [f64],
    ) -> Result<(), SimulationError> {
        let Self {
            k1,
            k2,
            k3,
            k4,
            tmp,
            forces,
        } = self;

        let mut fold = |forces: &[f64]| {
            for (p, f) in peak.iter_mut().zip(forces) {
                *p = p.max(f.abs());
            }
        };

        system.derivative(y, k1, forces)?;
        fold(forces);

        axpy(tmp, y, 0.5 * h, k1);
        system.derivative(tmp, k2, forces)?;
        fold(forces);

        axpy(tmp, y, 0.5 * h, k2);
        system.derivative(tmp, k3, forces)?;
        fold(forces);

        axpy(tmp, y, h, k3);
        system.derivative(tmp, k4, forces)?;
        fold(forces);

        for i in 0..y.len() {
            y[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
        Ok(())
    }
}

/// `out = y + a * x`
fn axpy(out: &mut [f64], y: &[f64], a: f64, x: &[f64]) {
    for ((o, yi), xi) in out.iter_mut().zip(y).zip(x) {
        *o = yi + a * xi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::analysis::{energy_conserved, total_energy};
    use crate::schema::{Colinear, Constraints, Direction, Particle, Pin, Rod, Slider};

    fn pendulum() -> TopologyConfig {
        TopologyConfig {
            particles: vec![
                Particle { x: 500.0, y: 500.0, mass: 1.0 },
                Particle { x: 600.0, y: 500.0, mass: 2.0 },
            ],
            constraints: Constraints {
                rod: vec![Rod { p1: 0, p2: 1, oneway: false }],
                pin: vec![Pin { p: 0 }],
                ..Default::default()
            },
            mainaxle: 0,
            projectile: 1,
            armtip: 1,
            duration: 12.0,
            ..Default::default()
        }
    }

    fn never(_: &[Vec<f64>]) -> bool {
        false
    }

    #[test]
    fn test_free_fall() {
        let config = TopologyConfig {
            particles: vec![Particle { x: 0.0, y: 0.0, mass: 3.0 }],
            projectile: 0,
            armtip: 0,
            timestep: 1.0,
            duration: 3.5,
            ..Default::default()
        };
        let trajectory = ConstraintIntegrator::default()
            .simulate(&config, &never)
            .unwrap();

        // Samples at t = 0, 1, 2, 3.
        assert_eq!(trajectory.states.len(), 4);
        let last = &trajectory.states[3];
        assert!((last[1] - 4.5).abs() < 1e-9, "y = 0.5 g t^2");
        assert!((last[3] - 3.0).abs() < 1e-9, "vy = g t");
        assert!(trajectory.forces.iter().all(|f| f.is_empty()));
    }

    #[test]
    fn test_pin_holds_particle() {
        let config = pendulum();
        let trajectory = ConstraintIntegrator::default()
            .simulate(&config, &never)
            .unwrap();

        for state in &trajectory.states {
            assert!((state[0] - 500.0).abs() < 1e-9);
            assert!((state[1] - 500.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_pendulum_keeps_length_and_energy() {
        let config = pendulum();
        let trajectory = ConstraintIntegrator::new(8)
            .simulate(&config, &never)
            .unwrap();

        for state in &trajectory.states {
            let len = (state[2] - state[0]).hypot(state[3] - state[1]);
            assert!((len - 100.0).abs() < 0.5, "rod length drifted to {len}");
        }
        assert!(energy_conserved(&trajectory.states, &config.particles, 0.01));

        // The bob swings down, converting height into speed.
        let last = trajectory.states.last().unwrap();
        assert!(last[3] > 500.0);
        let e0 = total_energy(&trajectory.states[0], &config.particles);
        assert!(e0.is_finite());
    }

    #[test]
    fn test_forces_logged_per_sample() {
        let config = pendulum();
        let trajectory = ConstraintIntegrator::default()
            .simulate(&config, &never)
            .unwrap();

        assert_eq!(trajectory.forces.len(), trajectory.states.len());
        // One rod plus two pin rows.
        assert!(trajectory.forces.iter().all(|f| f.len() == 3));
        assert!(trajectory.forces.iter().flatten().all(|f| *f >= 0.0));
    }

    #[test]
    fn test_terminate_stops_early() {
        let config = pendulum();
        let stop_at_three = |states: &[Vec<f64>]| states.len() >= 3;
        let trajectory = ConstraintIntegrator::default()
            .simulate(&config, &stop_at_three)
            .unwrap();
        assert_eq!(trajectory.states.len(), 3);
    }

    #[test]
    fn test_oneway_slider_releases() {
        // A floor that only pushes: the particle rests on it until released.
        let mut config = pendulum();
        config.constraints.pin.clear();
        config.constraints.rod.clear();
        config.constraints.slider.push(Slider {
            p: 1,
            normal: Direction::new(0.0, -1.0),
            oneway: true,
        });
        let trajectory = ConstraintIntegrator::default()
            .simulate(&config, &never)
            .unwrap();

        // Holding the particle against gravity needs a positive multiplier
        // along (0, -1), so the slider lets go and the particle falls.
        let last = trajectory.states.last().unwrap();
        assert!(last[3] > 500.0);
    }

    #[test]
    fn test_unsupported_and_degenerate_constraints() {
        let mut config = pendulum();
        config.constraints.colinear.push(Colinear {
            reference: 0,
            slider: 1,
            base: 0,
            oneway: false,
        });
        assert_eq!(
            ConstraintIntegrator::default().simulate(&config, &never),
            Err(SimulationError::UnsupportedConstraint("colinear"))
        );

        let mut config = pendulum();
        config.constraints.slider.push(Slider {
            p: 1,
            normal: Direction::new(0.0, 0.0),
            oneway: false,
        });
        assert_eq!(
            ConstraintIntegrator::default().simulate(&config, &never),
            Err(SimulationError::DegenerateSlider { p: 1 })
        );
    }

    #[test]
    fn test_redundant_constraints_are_singular() {
        let mut config = pendulum();
        config.constraints.slider.push(Slider {
            p: 0,
            normal: Direction::new(0.0, 1.0),
            oneway: false,
        });
        assert!(matches!(
            ConstraintIntegrator::default().simulate(&config, &never),
            Err(SimulationError::Solve(LinalgError::Singular { .. }))
        ));
    }
}
