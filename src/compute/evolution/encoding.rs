//! Fixed-length vector encoding of fixed-size topologies.
//!
//! For `n` particles the vector is laid out as:
//!
//! | section | length | contents |
//! |---------|--------|----------|
//! | rod bits | `n^2` | adjacency at `i * n + j`, only `i < j` read |
//! | pin bits | `n` | one per particle |
//! | slider bits | `n` | one per particle |
//! | positions | `2n` | normalized x/y, interleaved |
//! | masses | `n` | normalized |
//! | slider normals | `2n` | raw x/y components |
//!
//! Bits count as set above 0.5 after clamping to [0, 1].

use crate::schema::{
    Constraints, Direction, EncodingBounds, Particle, Pin, Rod, Slider, TopologyConfig,
};

use super::rng::SearchRng;

/// Role indices every decoded topology uses.
pub const FIXED_PROJECTILE: usize = 3;
pub const FIXED_ARMTIP: usize = 1;

/// Density of set bits in [`FixedEncoding::random_vector`].
const RANDOM_BIT_DENSITY: f64 = 0.3;

/// Encoding errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodingError {
    #[error("Fixed encodings need at least 4 particles, got {0}")]
    TooFewParticles(usize),
    #[error("Invalid encoding bounds: {0}")]
    InvalidBounds(String),
    #[error("Expected a vector of length {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Bijective map between vectors and `n`-particle topologies.
#[derive(Debug, Clone)]
pub struct FixedEncoding {
    n: usize,
    bounds: EncodingBounds,
}

impl FixedEncoding {
    pub fn new(n: usize, bounds: EncodingBounds) -> Result<Self, EncodingError> {
        if n <= FIXED_PROJECTILE {
            return Err(EncodingError::TooFewParticles(n));
        }
        bounds
            .validate()
            .map_err(|e| EncodingError::InvalidBounds(e.to_string()))?;
        Ok(Self { n, bounds })
    }

    #[inline]
    pub fn particle_count(&self) -> usize {
        self.n
    }

    pub fn bounds_config(&self) -> &EncodingBounds {
        &self.bounds
    }

    #[inline]
    fn pin_offset(&self) -> usize {
        self.n * self.n
    }

    #[inline]
    fn slider_offset(&self) -> usize {
        self.pin_offset() + self.n
    }

    /// Start of the continuous section.
    #[inline]
    pub fn binary_len(&self) -> usize {
        self.slider_offset() + self.n
    }

    #[inline]
    fn mass_offset(&self) -> usize {
        self.binary_len() + 2 * self.n
    }

    #[inline]
    fn normal_offset(&self) -> usize {
        self.mass_offset() + self.n
    }

    #[inline]
    pub fn continuous_len(&self) -> usize {
        5 * self.n
    }

    /// Total vector length: `n^2 + 7n`.
    #[inline]
    pub fn dim(&self) -> usize {
        self.binary_len() + self.continuous_len()
    }

    pub fn decode(&self, vector: &[f64]) -> Result<TopologyConfig, EncodingError> {
        if vector.len() != self.dim() {
            return Err(EncodingError::DimensionMismatch {
                expected: self.dim(),
                actual: vector.len(),
            });
        }
        let n = self.n;
        let bit = |idx: usize| vector[idx].clamp(0.0, 1.0) > 0.5;
        let unit = |idx: usize| vector[idx].clamp(0.0, 1.0);

        let pos = self.binary_len();
        let particles = (0..n)
            .map(|i| Particle {
                x: denormalize(unit(pos + 2 * i), self.bounds.pos_x),
                y: denormalize(unit(pos + 2 * i + 1), self.bounds.pos_y),
                mass: denormalize(unit(self.mass_offset() + i), self.bounds.mass),
            })
            .collect();

        let mut constraints = Constraints::default();
        for i in 0..n {
            for j in (i + 1)..n {
                if bit(i * n + j) {
                    constraints.rod.push(Rod {
                        p1: i,
                        p2: j,
                        oneway: false,
                    });
                }
            }
        }
        constraints.pin = (0..n)
            .filter(|&i| bit(self.pin_offset() + i))
            .map(|p| Pin { p })
            .collect();
        constraints.slider = (0..n)
            .filter(|&i| bit(self.slider_offset() + i))
            .map(|p| {
                let raw = Direction::new(
                    vector[self.normal_offset() + 2 * p],
                    vector[self.normal_offset() + 2 * p + 1],
                );
                Slider {
                    p,
                    normal: raw.normalized().unwrap_or(raw),
                    oneway: false,
                }
            })
            .collect();

        let mut config = TopologyConfig {
            particles,
            constraints,
            mainaxle: 0,
            projectile: FIXED_PROJECTILE,
            armtip: FIXED_ARMTIP,
            ..Default::default()
        };
        config.update_mainaxle();
        Ok(config)
    }

    /// Inverse of [`decode`](Self::decode).
    ///
    /// Particles and constraints beyond `n` are dropped; missing particles
    /// are padded with mid-range values. Slider normals are written raw,
    /// keyed by particle (last slider wins), `(0, 1)` where there is none.
    pub fn encode(&self, config: &TopologyConfig) -> Vec<f64> {
        let n = self.n;
        let mut vector = vec![0.0; self.dim()];

        for rod in &config.constraints.rod {
            let (i, j) = (rod.p1.min(rod.p2), rod.p1.max(rod.p2));
            if j < n {
                vector[i * n + j] = 1.0;
            }
        }
        for pin in &config.constraints.pin {
            if pin.p < n {
                vector[self.pin_offset() + pin.p] = 1.0;
            }
        }

        let mut normals = vec![Direction::default(); n];
        for slider in &config.constraints.slider {
            if slider.p < n {
                vector[self.slider_offset() + slider.p] = 1.0;
                normals[slider.p] = slider.normal;
            }
        }

        let pos = self.binary_len();
        for i in 0..n {
            let (x, y, mass) = match config.particles.get(i) {
                Some(p) => (
                    normalize(p.x, self.bounds.pos_x),
                    normalize(p.y, self.bounds.pos_y),
                    normalize(p.mass, self.bounds.mass),
                ),
                None => (0.5, 0.5, 0.5),
            };
            vector[pos + 2 * i] = x;
            vector[pos + 2 * i + 1] = y;
            vector[self.mass_offset() + i] = mass;
            vector[self.normal_offset() + 2 * i] = normals[i].x;
            vector[self.normal_offset() + 2 * i + 1] = normals[i].y;
        }

        vector
    }

    /// Per-dimension bounds of the continuous section: [0, 1] for positions
    /// and masses, [-1, 1] for slider normals.
    pub fn continuous_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let unit = 3 * self.n;
        let normals = 2 * self.n;
        let lower = std::iter::repeat_n(0.0, unit)
            .chain(std::iter::repeat_n(-1.0, normals))
            .collect();
        let upper = vec![1.0; unit + normals];
        (lower, upper)
    }

    /// Per-dimension bounds of the whole vector, binary section in [0, 1].
    pub fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let (cont_lower, cont_upper) = self.continuous_bounds();
        let mut lower = vec![0.0; self.binary_len()];
        let mut upper = vec![1.0; self.binary_len()];
        lower.extend(cont_lower);
        upper.extend(cont_upper);
        (lower, upper)
    }

    /// Random vector: 30% of bits set, continuous values uniform in [0, 1].
    ///
    /// Slider normals are drawn from [0, 1] too, so random normals only
    /// point into the first quadrant.
    pub fn random_vector(&self, rng: &mut SearchRng) -> Vec<f64> {
        let mut vector = Vec::with_capacity(self.dim());
        for _ in 0..self.binary_len() {
            vector.push(if rng.chance(RANDOM_BIT_DENSITY) { 1.0 } else { 0.0 });
        }
        for _ in 0..self.continuous_len() {
            vector.push(rng.uniform());
        }
        vector
    }
}

#[inline]
fn normalize(value: f64, (min, max): (f64, f64)) -> f64 {
    (value - min) / (max - min)
}

#[inline]
fn denormalize(value: f64, (min, max): (f64, f64)) -> f64 {
    min + value * (max - min)
}
