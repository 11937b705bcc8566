//! Structural mutation and random generation of variable-size topologies.
//!
//! Every operator works on a config the caller already owns; `mutate` deep
//! copies its input first so parents, elites and history snapshots never
//! share state. The mainaxle invariant is restored after each operator.

use crate::schema::{Constraints, Direction, Particle, Rod, Slider, TopologyConfig};

use super::rng::SearchRng;

/// Centre around which new particles are placed.
const CENTER: f64 = 500.0;

/// Structural edits never shrink a topology below this many particles.
const MIN_PARTICLES: usize = 4;

/// A single structural or parametric edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    AddParticle,
    RemoveParticle,
    AddRod,
    RemoveRod,
    AddSlider,
    RemoveSlider,
    /// Nudge one particle by up to 10 units per axis.
    PerturbPosition,
    /// Scale one particle's mass by a factor in [0.7, 1.3].
    PerturbMass,
}

impl MutationOp {
    /// All operators, in selection order.
    pub const ALL: [MutationOp; 8] = [
        MutationOp::AddParticle,
        MutationOp::RemoveParticle,
        MutationOp::AddRod,
        MutationOp::RemoveRod,
        MutationOp::AddSlider,
        MutationOp::RemoveSlider,
        MutationOp::PerturbPosition,
        MutationOp::PerturbMass,
    ];
}

/// Mutation operators and population generator for the topology GA.
#[derive(Debug, Clone, Copy)]
pub struct TopologyMutator {
    /// Probability that each pass applies an operator.
    pub mutation_rate: f64,
    pub min_mass: f64,
}

impl TopologyMutator {
    pub fn new(mutation_rate: f64, min_mass: f64) -> Self {
        Self {
            mutation_rate,
            min_mass,
        }
    }

    /// Mutated copy of `config`: 1 to 3 passes, each applying one uniformly
    /// chosen operator with probability `mutation_rate`.
    pub fn mutate(&self, config: &TopologyConfig, rng: &mut SearchRng) -> TopologyConfig {
        let mut child = config.clone();
        let passes = 1 + rng.index(3);
        for _ in 0..passes {
            if rng.chance(self.mutation_rate) {
                let op = MutationOp::ALL[rng.index(MutationOp::ALL.len())];
                self.apply(op, &mut child, rng);
            }
        }
        child
    }

    /// Apply one operator in place, then restore the mainaxle invariant.
    pub fn apply(&self, op: MutationOp, config: &mut TopologyConfig, rng: &mut SearchRng) {
        match op {
            MutationOp::AddParticle => self.add_particle(config, rng),
            MutationOp::RemoveParticle => remove_particle(config, rng),
            MutationOp::AddRod => add_rod(config, rng),
            MutationOp::RemoveRod => {
                if !config.constraints.rod.is_empty() {
                    let idx = rng.index(config.constraints.rod.len());
                    config.constraints.rod.remove(idx);
                }
            }
            MutationOp::AddSlider => add_slider(config, rng),
            MutationOp::RemoveSlider => {
                if !config.constraints.slider.is_empty() {
                    let idx = rng.index(config.constraints.slider.len());
                    config.constraints.slider.remove(idx);
                }
            }
            MutationOp::PerturbPosition => {
                if !config.particles.is_empty() {
                    let idx = rng.index(config.particles.len());
                    let particle = &mut config.particles[idx];
                    particle.x += (rng.uniform() - 0.5) * 20.0;
                    particle.y += (rng.uniform() - 0.5) * 20.0;
                }
            }
            MutationOp::PerturbMass => {
                if !config.particles.is_empty() {
                    let idx = rng.index(config.particles.len());
                    let particle = &mut config.particles[idx];
                    particle.mass *= 0.7 + rng.uniform() * 0.6;
                    particle.mass = particle.mass.max(self.min_mass);
                }
            }
        }
        config.update_mainaxle();
    }

    fn add_particle(&self, config: &mut TopologyConfig, rng: &mut SearchRng) {
        let x = CENTER + (rng.uniform() - 0.5) * 400.0;
        let y = CENTER + (rng.uniform() - 0.5) * 400.0;
        let mass = self.min_mass + rng.uniform() * 99.0;
        config.particles.push(Particle { x, y, mass });
    }

    /// Initial GA population drawn from its own stream seeded with `seed`.
    pub fn initial_population(&self, size: usize, seed: u64) -> Vec<TopologyConfig> {
        let mut rng = SearchRng::new(seed);
        self.random_population(size, &mut rng)
    }

    pub fn random_population(&self, size: usize, rng: &mut SearchRng) -> Vec<TopologyConfig> {
        (0..size).map(|_| self.random_topology(rng)).collect()
    }

    /// A 4 to 8 particle topology around the centre.
    ///
    /// Rods join random distinct pairs (about 0.8 per particle, duplicates
    /// skipped). The axle gets a vertical slider 80% of the time and the
    /// projectile a one-way slider in a random direction 50% of the time.
    pub fn random_topology(&self, rng: &mut SearchRng) -> TopologyConfig {
        let n = MIN_PARTICLES + rng.index(5);

        let particles: Vec<Particle> = (0..n)
            .map(|_| Particle {
                x: CENTER + (rng.uniform() - 0.5) * 300.0,
                y: CENTER + (rng.uniform() - 0.5) * 300.0,
                mass: self.min_mass + rng.uniform() * 199.0,
            })
            .collect();

        let mut config = TopologyConfig {
            particles,
            constraints: Constraints::default(),
            mainaxle: 0,
            projectile: (n - 1).min(3),
            armtip: (n - 2).min(1),
            ..Default::default()
        };

        for _ in 0..(n * 4 / 5) {
            let p1 = rng.index(n);
            let mut p2 = rng.index(n);
            while p2 == p1 {
                p2 = rng.index(n);
            }
            if !config.has_rod(p1, p2) {
                config.constraints.rod.push(Rod {
                    p1,
                    p2,
                    oneway: false,
                });
            }
        }

        if rng.chance(0.8) {
            config.constraints.slider.push(Slider {
                p: config.mainaxle,
                normal: Direction::default(),
                oneway: false,
            });
        }
        if rng.chance(0.5) {
            config.constraints.slider.push(Slider {
                p: config.projectile,
                normal: rng.direction(),
                oneway: true,
            });
        }

        config.update_mainaxle();
        config
    }
}

/// Drop a random non-role particle, keeping at least four.
fn remove_particle(config: &mut TopologyConfig, rng: &mut SearchRng) {
    if config.particles.len() <= MIN_PARTICLES {
        return;
    }
    let idx = rng.index(config.particles.len());
    // Refused for role particles.
    config.remove_particle(idx);
}

fn add_rod(config: &mut TopologyConfig, rng: &mut SearchRng) {
    let n = config.particles.len();
    if n < 2 {
        return;
    }
    let p1 = rng.index(n);
    let mut p2 = rng.index(n);
    while p2 == p1 {
        p2 = rng.index(n);
    }
    if !config.has_rod(p1, p2) {
        let oneway = rng.chance(0.1);
        config.constraints.rod.push(Rod { p1, p2, oneway });
    }
}

fn add_slider(config: &mut TopologyConfig, rng: &mut SearchRng) {
    if config.particles.is_empty() {
        return;
    }
    let p = rng.index(config.particles.len());
    let normal = rng.direction();
    let oneway = rng.chance(0.15);
    config.constraints.slider.push(Slider { p, normal, oneway });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_mainaxle_invariant(config: &TopologyConfig) {
        let anchored: Vec<usize> = config
            .constraints
            .pin
            .iter()
            .map(|p| p.p)
            .chain(config.constraints.slider.iter().map(|s| s.p))
            .collect();
        if anchored.is_empty() {
            assert_eq!(config.mainaxle, 0);
        } else {
            let max_y = anchored
                .iter()
                .map(|&i| config.particles[i].y)
                .fold(f64::NEG_INFINITY, f64::max);
            assert!(anchored.contains(&config.mainaxle));
            assert_eq!(config.particles[config.mainaxle].y, max_y);
        }
    }

    #[test]
    fn test_initial_population_shape() {
        let mutator = TopologyMutator::new(0.3, 1.0);
        let population = mutator.initial_population(50, 12345);
        assert_eq!(population.len(), 50);

        for config in &population {
            let n = config.particles.len();
            assert!((4..=8).contains(&n));
            assert_eq!(config.projectile, 3);
            assert_eq!(config.armtip, 1);
            assert!(config.particles.iter().all(|p| (1.0..=200.0).contains(&p.mass)));
            assert!(config.particles.iter().all(|p| (350.0..=650.0).contains(&p.x)));
            for rod in &config.constraints.rod {
                assert_ne!(rod.p1, rod.p2);
            }
            for (i, a) in config.constraints.rod.iter().enumerate() {
                for b in &config.constraints.rod[i + 1..] {
                    assert!(!a.joins(b.p1, b.p2), "duplicate rod {a:?}");
                }
            }
            assert!(config.validate().is_ok());
            assert_mainaxle_invariant(config);
        }
    }

    #[test]
    fn test_initial_population_is_deterministic() {
        let mutator = TopologyMutator::new(0.3, 1.0);
        assert_eq!(
            mutator.initial_population(20, 99),
            mutator.initial_population(20, 99)
        );
        assert_ne!(
            mutator.initial_population(20, 99),
            mutator.initial_population(20, 100)
        );
    }

    #[test]
    fn test_mutate_does_not_touch_parent() {
        let mutator = TopologyMutator::new(1.0, 1.0);
        let parent = mutator.initial_population(1, 5).remove(0);
        let snapshot = parent.clone();
        let mut rng = SearchRng::new(11);
        for _ in 0..20 {
            let _ = mutator.mutate(&parent, &mut rng);
        }
        assert_eq!(parent, snapshot);
    }

    #[test]
    fn test_zero_rate_is_identity() {
        let mutator = TopologyMutator::new(0.0, 1.0);
        let parent = mutator.initial_population(1, 5).remove(0);
        let mut rng = SearchRng::new(11);
        assert_eq!(mutator.mutate(&parent, &mut rng), parent);
    }

    #[test]
    fn test_mass_floor() {
        let mutator = TopologyMutator::new(1.0, 10.0);
        let mut config = mutator.initial_population(1, 3).remove(0);
        config.particles.iter_mut().for_each(|p| p.mass = 10.0);
        let mut rng = SearchRng::new(1);
        for _ in 0..50 {
            mutator.apply(MutationOp::PerturbMass, &mut config, &mut rng);
        }
        assert!(config.particles.iter().all(|p| p.mass >= 10.0));
    }

    #[test]
    fn test_remove_keeps_minimum_particles() {
        let mutator = TopologyMutator::new(1.0, 1.0);
        let mut config = mutator.initial_population(1, 8).remove(0);
        config.particles.truncate(4);
        config.constraints = Constraints::default();
        config.update_mainaxle();
        let before = config.clone();

        let mut rng = SearchRng::new(2);
        for _ in 0..20 {
            mutator.apply(MutationOp::RemoveParticle, &mut config, &mut rng);
        }
        assert_eq!(config, before);
    }

    #[test]
    fn test_add_rod_never_duplicates() {
        let mutator = TopologyMutator::new(1.0, 1.0);
        let mut config = mutator.initial_population(1, 21).remove(0);
        let mut rng = SearchRng::new(4);
        for _ in 0..200 {
            mutator.apply(MutationOp::AddRod, &mut config, &mut rng);
        }
        let n = config.particles.len();
        assert!(config.constraints.rod.len() <= n * (n - 1) / 2);
    }

    fn any_op() -> impl Strategy<Value = MutationOp> {
        (0..MutationOp::ALL.len()).prop_map(|i| MutationOp::ALL[i])
    }

    proptest! {
        #[test]
        fn prop_operators_preserve_invariants(
            seed in any::<u64>(),
            ops in prop::collection::vec(any_op(), 1..60),
        ) {
            let mutator = TopologyMutator::new(1.0, 1.0);
            let mut rng = SearchRng::new(seed);
            let mut config = mutator.random_topology(&mut rng);

            for op in ops {
                let before = config.clone();
                mutator.apply(op, &mut config, &mut rng);

                prop_assert!(config.validate().is_ok());
                prop_assert!(config.particles.len() >= MIN_PARTICLES);
                assert_mainaxle_invariant(&config);

                // Removal either shrinks by one or leaves the config unchanged.
                if op == MutationOp::RemoveParticle
                    && config.particles.len() == before.particles.len()
                {
                    prop_assert_eq!(&config, &before);
                }
            }
        }

        #[test]
        fn prop_mutate_is_deterministic(seed in any::<u64>(), stream in any::<u64>()) {
            let mutator = TopologyMutator::new(0.8, 1.0);
            let parent = mutator.initial_population(1, seed).remove(0);
            let mut a = SearchRng::new(stream);
            let mut b = SearchRng::new(stream);
            prop_assert_eq!(mutator.mutate(&parent, &mut a), mutator.mutate(&parent, &mut b));
        }
    }
}
