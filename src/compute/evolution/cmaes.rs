//! Covariance matrix adaptation evolution strategy.
//!
//! Maximizes a black-box fitness over real vectors. The optimizer only sees
//! vectors and scalar fitnesses; decoding them into topologies is the
//! caller's business.

use crate::compute::linalg::{LinalgError, symmetric_eigen};
use crate::schema::{CmaEsConfig, EigenMode, SearchConfigError};

use super::rng::SearchRng;

/// Floor applied to every axis length of the sampling ellipsoid.
const MIN_AXIS: f64 = 1e-10;

/// Coordinate bounds used by [`ClampMode::Global`](crate::schema::ClampMode).
pub const GLOBAL_BOUNDS: (f64, f64) = (-1.0, 1.0);

/// Summary returned by [`CmaEs::update`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationStats {
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub sigma: f64,
}

/// CMA-ES errors.
#[derive(Debug, thiserror::Error)]
pub enum CmaEsError {
    #[error("Update needs at least {mu} individuals, got {got}")]
    TooFewIndividuals { got: usize, mu: usize },
    #[error("Expected vectors of length {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Invalid strategy settings: {0}")]
    Config(#[from] SearchConfigError),
    #[error("Eigendecomposition failed: {0}")]
    Eigen(#[from] LinalgError),
}

/// Cached factorization `C ~ B D^2 B^T`.
#[derive(Debug, Clone)]
struct Eigenbasis {
    /// Row-major eigenvectors as columns; `None` is the identity.
    vectors: Option<Vec<f64>>,
    /// Axis lengths (square roots of the eigenvalues).
    axes: Vec<f64>,
}

impl Eigenbasis {
    /// `B * D * z`.
    fn transform(&self, z: &[f64]) -> Vec<f64> {
        let scaled: Vec<f64> = z.iter().zip(&self.axes).map(|(z, d)| z * d).collect();
        match &self.vectors {
            None => scaled,
            Some(b) => mat_vec(b, &scaled),
        }
    }

    /// `B * D^-1 * B^T * x`.
    fn inverse_sqrt(&self, x: &[f64]) -> Vec<f64> {
        match &self.vectors {
            None => x
                .iter()
                .zip(&self.axes)
                .map(|(x, d)| x / d.max(MIN_AXIS))
                .collect(),
            Some(b) => {
                let n = self.axes.len();
                let mut projected = vec![0.0; n];
                for (i, p) in projected.iter_mut().enumerate() {
                    *p = (0..n).map(|j| b[j * n + i] * x[j]).sum::<f64>() / self.axes[i].max(MIN_AXIS);
                }
                mat_vec(b, &projected)
            }
        }
    }
}

fn mat_vec(m: &[f64], v: &[f64]) -> Vec<f64> {
    let n = v.len();
    (0..n)
        .map(|i| m[i * n..(i + 1) * n].iter().zip(v).map(|(a, b)| a * b).sum())
        .collect()
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// CMA-ES state for one search run.
#[derive(Debug, Clone)]
pub struct CmaEs {
    dim: usize,
    lambda: usize,
    mu: usize,
    weights: Vec<f64>,
    mueff: f64,
    cc: f64,
    cs: f64,
    c1: f64,
    cmu: f64,
    damps: f64,
    chi_n: f64,

    mean: Vec<f64>,
    sigma: f64,
    /// Row-major `dim x dim` covariance.
    cov: Vec<f64>,
    pc: Vec<f64>,
    ps: Vec<f64>,
    generation: usize,

    eigen_mode: EigenMode,
    /// Generations between basis refreshes; 0 never refreshes.
    eigen_interval: usize,
    /// Starts as the identity, which is the factorization of the initial C.
    basis: Eigenbasis,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl CmaEs {
    /// Create a strategy over `dim` coordinates.
    pub fn new(dim: usize, config: &CmaEsConfig) -> Result<Self, CmaEsError> {
        config.validate()?;
        if dim == 0 {
            return Err(CmaEsError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        let n = dim as f64;

        let lambda = config
            .population_size
            .unwrap_or(4 + (3.0 * n.ln()).floor() as usize);
        let mu = config.parent_count.unwrap_or(lambda / 2).max(1);
        if mu > lambda {
            return Err(SearchConfigError::InvalidParentCount { mu, lambda }.into());
        }

        let raw: Vec<f64> = (0..mu)
            .map(|i| (mu as f64 + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
        let mueff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let cc = (4.0 + mueff / n) / (n + 4.0 + 2.0 * mueff / n);
        let cs = (mueff + 2.0) / (n + mueff + 5.0);
        let c1 = 2.0 / ((n + 1.3).powi(2) + mueff);
        let cmu = (1.0 - c1).min(2.0 * (mueff - 2.0 + 1.0 / mueff) / ((n + 2.0).powi(2) + mueff));
        let damps = 1.0 + 2.0 * (((mueff - 1.0) / (n + 1.0)).sqrt() - 1.0).max(0.0) + cs;
        let chi_n = n.sqrt() * (1.0 - 1.0 / (4.0 * n) + 1.0 / (21.0 * n * n));
        let eigen_interval = (1.0 / (c1 + cmu) / n / 10.0).floor() as usize;

        let mean = match &config.initial_mean {
            Some(mean) if mean.len() != dim => {
                return Err(CmaEsError::DimensionMismatch {
                    expected: dim,
                    actual: mean.len(),
                });
            }
            Some(mean) => mean.clone(),
            None => vec![0.5; dim],
        };

        let mut cov = vec![0.0; dim * dim];
        for i in 0..dim {
            cov[i * dim + i] = 1.0;
        }

        Ok(Self {
            dim,
            lambda,
            mu,
            weights,
            mueff,
            cc,
            cs,
            c1,
            cmu,
            damps,
            chi_n,
            mean,
            sigma: config.initial_sigma,
            cov,
            pc: vec![0.0; dim],
            ps: vec![0.0; dim],
            generation: 0,
            eigen_mode: config.eigen_mode,
            eigen_interval,
            basis: Eigenbasis {
                vectors: None,
                axes: vec![1.0; dim],
            },
            lower: vec![GLOBAL_BOUNDS.0; dim],
            upper: vec![GLOBAL_BOUNDS.1; dim],
        })
    }

    /// Replace the global [-1, 1] clamp with per-coordinate bounds.
    pub fn with_bounds(mut self, lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, CmaEsError> {
        for len in [lower.len(), upper.len()] {
            if len != self.dim {
                return Err(CmaEsError::DimensionMismatch {
                    expected: self.dim,
                    actual: len,
                });
            }
        }
        self.lower = lower;
        self.upper = upper;
        Ok(self)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn lambda(&self) -> usize {
        self.lambda
    }

    pub fn mu(&self) -> usize {
        self.mu
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Completed `update` calls.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn mueff(&self) -> f64 {
        self.mueff
    }

    /// Covariance entry `C[i][j]`.
    pub fn covariance(&self, i: usize, j: usize) -> f64 {
        self.cov[i * self.dim + j]
    }

    fn refresh_basis(&mut self) -> Result<(), CmaEsError> {
        let n = self.dim;
        let basis = match self.eigen_mode {
            EigenMode::Diagonal => Eigenbasis {
                vectors: None,
                axes: (0..n)
                    .map(|i| self.cov[i * n + i].max(MIN_AXIS).sqrt())
                    .collect(),
            },
            EigenMode::Full => {
                let (values, vectors) = symmetric_eigen(&self.cov, n)?;
                Eigenbasis {
                    vectors: Some(vectors),
                    axes: values.iter().map(|v| v.max(MIN_AXIS).sqrt()).collect(),
                }
            }
        };
        log::debug!(
            "CMA-ES generation {}: refreshed {:?} basis",
            self.generation,
            self.eigen_mode
        );
        self.basis = basis;
        Ok(())
    }

    /// Draw `lambda` candidates `mean + sigma * B * D * z`, clamped.
    pub fn sample_population(&mut self, rng: &mut SearchRng) -> Result<Vec<Vec<f64>>, CmaEsError> {
        if self.eigen_interval > 0 && self.generation % self.eigen_interval == 0 {
            self.refresh_basis()?;
        }

        let population = (0..self.lambda)
            .map(|_| {
                let z: Vec<f64> = (0..self.dim).map(|_| rng.standard_normal()).collect();
                self.basis
                    .transform(&z)
                    .iter()
                    .enumerate()
                    .map(|(j, y)| (self.mean[j] + self.sigma * y).clamp(self.lower[j], self.upper[j]))
                    .collect()
            })
            .collect();
        Ok(population)
    }

    /// Move the distribution towards the best `mu` of `individuals`.
    ///
    /// Individuals are ranked by descending fitness; equal fitnesses keep
    /// their input order.
    pub fn update(
        &mut self,
        mut individuals: Vec<(Vec<f64>, f64)>,
    ) -> Result<GenerationStats, CmaEsError> {
        if individuals.len() < self.mu {
            return Err(CmaEsError::TooFewIndividuals {
                got: individuals.len(),
                mu: self.mu,
            });
        }
        if let Some((v, _)) = individuals.iter().find(|(v, _)| v.len() != self.dim) {
            return Err(CmaEsError::DimensionMismatch {
                expected: self.dim,
                actual: v.len(),
            });
        }

        individuals.sort_by(|a, b| b.1.total_cmp(&a.1));
        let selected = &individuals[..self.mu];
        let n = self.dim;

        let old_mean = std::mem::replace(&mut self.mean, vec![0.0; n]);
        for ((x, _), w) in selected.iter().zip(&self.weights) {
            for (m, xi) in self.mean.iter_mut().zip(x) {
                *m += w * xi;
            }
        }

        let shift: Vec<f64> = self
            .mean
            .iter()
            .zip(&old_mean)
            .map(|(m, o)| (m - o) / self.sigma)
            .collect();

        let whitened = self.basis.inverse_sqrt(&shift);
        let ps_gain = (self.cs * (2.0 - self.cs) * self.mueff).sqrt();
        for (ps, w) in self.ps.iter_mut().zip(&whitened) {
            *ps = (1.0 - self.cs) * *ps + ps_gain * w;
        }

        let ps_norm = norm(&self.ps);
        let decay = 1.0 - (1.0 - self.cs).powi(2 * (self.generation as i32 + 1));
        let hsig = ps_norm / decay.sqrt() / self.chi_n < 1.4 + 2.0 / (n as f64 + 1.0);

        let pc_gain = if hsig {
            (self.cc * (2.0 - self.cc) * self.mueff).sqrt()
        } else {
            0.0
        };
        for (pc, s) in self.pc.iter_mut().zip(&shift) {
            *pc = (1.0 - self.cc) * *pc + pc_gain * s;
        }

        let steps: Vec<Vec<f64>> = selected
            .iter()
            .map(|(x, _)| {
                x.iter()
                    .zip(&old_mean)
                    .map(|(xi, o)| (xi - o) / self.sigma)
                    .collect()
            })
            .collect();

        let hsig_loss = if hsig {
            0.0
        } else {
            self.c1 * self.cc * (2.0 - self.cc)
        };
        let factor = 1.0 - self.c1 - self.cmu + hsig_loss;
        for i in 0..n {
            for j in 0..=i {
                let rank_mu: f64 = steps
                    .iter()
                    .zip(&self.weights)
                    .map(|(y, w)| w * y[i] * y[j])
                    .sum();
                let value = factor * self.cov[i * n + j]
                    + self.c1 * self.pc[i] * self.pc[j]
                    + self.cmu * rank_mu;
                self.cov[i * n + j] = value;
                self.cov[j * n + i] = value;
            }
        }

        self.sigma *= ((self.cs / self.damps) * (ps_norm / self.chi_n - 1.0)).exp();
        self.generation += 1;

        let mean_fitness =
            individuals.iter().map(|(_, f)| f).sum::<f64>() / individuals.len() as f64;
        Ok(GenerationStats {
            best_fitness: individuals[0].1,
            mean_fitness,
            sigma: self.sigma,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(lambda: Option<usize>) -> CmaEsConfig {
        CmaEsConfig {
            population_size: lambda,
            ..Default::default()
        }
    }

    fn sphere(x: &[f64], target: f64) -> f64 {
        -x.iter().map(|v| (v - target).powi(2)).sum::<f64>()
    }

    fn optimize(mode: EigenMode, generations: usize) -> CmaEs {
        let cfg = CmaEsConfig {
            eigen_mode: mode,
            ..Default::default()
        };
        let mut cma = CmaEs::new(5, &cfg).unwrap();
        let mut rng = SearchRng::new(11);
        for _ in 0..generations {
            let population = cma.sample_population(&mut rng).unwrap();
            let scored = population
                .into_iter()
                .map(|x| {
                    let f = sphere(&x, 0.2);
                    (x, f)
                })
                .collect();
            cma.update(scored).unwrap();
        }
        cma
    }

    #[test]
    fn test_default_strategy_parameters() {
        let cma = CmaEs::new(10, &config(None)).unwrap();
        assert_eq!(cma.lambda(), 10);
        assert_eq!(cma.mu(), 5);
        assert!((cma.weights().iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(cma.weights().windows(2).all(|w| w[0] > w[1]));
        assert!(cma.mueff() > 1.0 && cma.mueff() < 5.0);
        assert_eq!(cma.mean(), &[0.5; 10]);
        assert_eq!(cma.sigma(), 0.3);
        assert_eq!(cma.covariance(3, 3), 1.0);
        assert_eq!(cma.covariance(3, 4), 0.0);

        let cma = CmaEs::new(120, &config(Some(20))).unwrap();
        assert_eq!(cma.lambda(), 20);
        assert_eq!(cma.mu(), 10);
        assert!(cma.c1 + cma.cmu <= 1.0);
        assert!(cma.damps > 1.0);
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let mut a = CmaEs::new(12, &config(Some(6))).unwrap();
        let mut b = CmaEs::new(12, &config(Some(6))).unwrap();
        let pa = a.sample_population(&mut SearchRng::new(5)).unwrap();
        let pb = b.sample_population(&mut SearchRng::new(5)).unwrap();
        assert_eq!(pa.len(), 6);
        for (x, y) in pa.iter().zip(&pb) {
            assert!(x.iter().zip(y).all(|(p, q)| p.to_bits() == q.to_bits()));
        }
    }

    #[test]
    fn test_samples_are_clamped() {
        let cfg = CmaEsConfig {
            initial_sigma: 50.0,
            ..Default::default()
        };
        let mut cma = CmaEs::new(6, &cfg).unwrap();
        let mut rng = SearchRng::new(1);
        for x in cma.sample_population(&mut rng).unwrap() {
            assert!(x.iter().all(|v| (-1.0..=1.0).contains(v)));
        }

        let mut cma = CmaEs::new(6, &cfg)
            .unwrap()
            .with_bounds(vec![0.0; 6], vec![0.25; 6])
            .unwrap();
        for x in cma.sample_population(&mut rng).unwrap() {
            assert!(x.iter().all(|v| (0.0..=0.25).contains(v)));
        }
    }

    #[test]
    fn test_diagonal_converges_on_sphere() {
        let cma = optimize(EigenMode::Diagonal, 300);
        for m in cma.mean() {
            assert!((m - 0.2).abs() < 1e-2, "mean {:?}", cma.mean());
        }
        assert!(cma.sigma() < 0.3);
        assert_eq!(cma.generation(), 300);
    }

    #[test]
    fn test_full_converges_on_sphere() {
        let cma = optimize(EigenMode::Full, 300);
        for m in cma.mean() {
            assert!((m - 0.2).abs() < 1e-2, "mean {:?}", cma.mean());
        }
        for i in 0..5 {
            for j in 0..5 {
                assert_eq!(cma.covariance(i, j), cma.covariance(j, i));
            }
        }
    }

    #[test]
    fn test_eigen_refresh_interval() {
        // Small problems never refresh; the 120-dim search refreshes every
        // generation.
        assert_eq!(CmaEs::new(5, &config(None)).unwrap().eigen_interval, 0);
        assert_eq!(CmaEs::new(120, &config(Some(20))).unwrap().eigen_interval, 1);
    }

    #[test]
    fn test_full_basis_refresh_on_large_problem() {
        let cfg = CmaEsConfig {
            population_size: Some(20),
            eigen_mode: EigenMode::Full,
            ..Default::default()
        };
        let mut cma = CmaEs::new(120, &cfg).unwrap();
        let mut rng = SearchRng::new(3);
        for _ in 0..2 {
            let population = cma.sample_population(&mut rng).unwrap();
            let scored = population
                .into_iter()
                .map(|x| {
                    let f = x.iter().sum::<f64>();
                    (x, f)
                })
                .collect();
            cma.update(scored).unwrap();
        }
        let population = cma.sample_population(&mut rng).unwrap();
        assert!(cma.basis.vectors.is_some());
        assert_eq!(cma.basis.axes.len(), 120);
        assert!(population.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_update_stats_and_ranking() {
        let mut cma = CmaEs::new(2, &config(Some(4))).unwrap();
        let individuals = vec![
            (vec![0.1, 0.1], 1.0),
            (vec![0.9, 0.9], 4.0),
            (vec![0.5, 0.5], 2.0),
            (vec![0.3, 0.3], 3.0),
        ];
        let stats = cma.update(individuals).unwrap();
        assert_eq!(stats.best_fitness, 4.0);
        assert_eq!(stats.mean_fitness, 2.5);
        assert_eq!(stats.sigma, cma.sigma());
        assert_eq!(cma.generation(), 1);

        // mu = 2: mean is a weighted blend of 0.9 and 0.3, leaning to 0.9.
        let w = cma.weights().to_vec();
        let expected = w[0] * 0.9 + w[1] * 0.3;
        assert!((cma.mean()[0] - expected).abs() < 1e-12);
        assert!(cma.mean()[0] > 0.6);
    }

    #[test]
    fn test_update_rejects_bad_input() {
        let mut cma = CmaEs::new(3, &config(Some(6))).unwrap();
        assert!(matches!(
            cma.update(vec![(vec![0.0; 3], 1.0)]),
            Err(CmaEsError::TooFewIndividuals { got: 1, mu: 3 })
        ));
        let bad = vec![(vec![0.0; 3], 1.0), (vec![0.0; 2], 1.0), (vec![0.0; 3], 0.0)];
        assert!(matches!(
            cma.update(bad),
            Err(CmaEsError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert_eq!(cma.generation(), 0);
    }

    #[test]
    fn test_rejects_bad_construction() {
        let cfg = CmaEsConfig {
            initial_mean: Some(vec![0.0; 2]),
            ..Default::default()
        };
        assert!(matches!(
            CmaEs::new(3, &cfg),
            Err(CmaEsError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        let cfg = CmaEsConfig {
            initial_sigma: 0.0,
            ..Default::default()
        };
        assert!(matches!(CmaEs::new(3, &cfg), Err(CmaEsError::Config(_))));
        assert!(CmaEs::new(3, &config(None)).unwrap().with_bounds(vec![0.0], vec![1.0; 3]).is_err());
    }
}
