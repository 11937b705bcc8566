//! Seedable random stream shared by sampling, mutation and population setup.

use rand::prelude::*;
use rand_distr::UnitCircle;

use crate::schema::Direction;

/// Random number generator wrapper for search operations.
///
/// Every stochastic call takes `&mut SearchRng`, so one seed fixes the whole
/// run.
#[derive(Debug, Clone)]
pub struct SearchRng {
    rng: StdRng,
}

impl SearchRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform draw in `[0, 1)`.
    #[inline]
    pub fn uniform(&mut self) -> f64 {
        self.rng.r#gen::<f64>()
    }

    /// Uniform draw in `[lo, hi)`.
    pub fn range(&mut self, bounds: (f64, f64)) -> f64 {
        bounds.0 + self.uniform() * (bounds.1 - bounds.0)
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    #[inline]
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// `true` with probability `p`.
    #[inline]
    pub fn chance(&mut self, p: f64) -> bool {
        self.uniform() < p
    }

    /// Standard normal draw via Box-Muller; consumes two uniforms.
    pub fn standard_normal(&mut self) -> f64 {
        // 1 - u keeps the log argument in (0, 1].
        let u1 = 1.0 - self.uniform();
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    /// Uniformly distributed unit vector.
    pub fn direction(&mut self) -> Direction {
        let [x, y]: [f64; 2] = UnitCircle.sample(&mut self.rng);
        Direction::new(x, y)
    }

    /// Derive a seed for an independent stream.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.next_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SearchRng::new(7);
        let mut b = SearchRng::new(7);
        for _ in 0..50 {
            assert_eq!(a.uniform().to_bits(), b.uniform().to_bits());
            assert_eq!(a.standard_normal().to_bits(), b.standard_normal().to_bits());
            assert_eq!(a.index(13), b.index(13));
        }
    }

    #[test]
    fn test_normal_moments() {
        let mut rng = SearchRng::new(42);
        let samples: Vec<f64> = (0..20_000).map(|_| rng.standard_normal()).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;

        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "variance {var}");
        assert!(samples.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_direction_is_unit() {
        let mut rng = SearchRng::new(3);
        for _ in 0..100 {
            let d = rng.direction();
            assert!((d.length() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_range_and_index_bounds() {
        let mut rng = SearchRng::new(9);
        for _ in 0..1000 {
            let x = rng.range((350.0, 650.0));
            assert!((350.0..650.0).contains(&x));
            assert!(rng.index(5) < 5);
        }
    }
}
