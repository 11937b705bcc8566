//! Search drivers: the variable-size topology GA and CMA-ES over a fixed
//! encoding.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::compute::{ConstraintIntegrator, Simulator};
use crate::schema::{
    BestIndividual, ClampMode, CmaEsGenerationRecord, CmaEsSearchConfig, CmaEsSearchResult,
    FitnessResult, GaGenerationRecord, GeneticSearchConfig, GeneticSearchResult,
    RejectionHistogram, SearchConfigError, SearchStats, StopReason, TopologyConfig,
};

use super::cmaes::{CmaEs, CmaEsError};
use super::encoding::{EncodingError, FixedEncoding};
use super::fitness::FitnessEvaluator;
use super::mutation::TopologyMutator;
use super::rng::SearchRng;

/// GA generations between progress log lines.
const GA_LOG_INTERVAL: usize = 5;
/// CMA-ES generations between progress log lines.
const CMA_LOG_INTERVAL: usize = 10;

/// Errors raised while setting up or running a search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Config(#[from] SearchConfigError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    CmaEs(#[from] CmaEsError),
}

/// Evaluate every config in parallel, preserving input order.
fn evaluate_all<S: Simulator>(
    evaluator: &FitnessEvaluator<S>,
    configs: &[TopologyConfig],
) -> Vec<FitnessResult> {
    configs.par_iter().map(|c| evaluator.evaluate(c)).collect()
}

/// Valid count and rejection histogram for one generation.
fn tally<'a>(results: impl IntoIterator<Item = &'a FitnessResult>) -> (usize, RejectionHistogram) {
    let mut valid = 0;
    let mut reasons = RejectionHistogram::new();
    for result in results {
        match result.reason {
            _ if result.valid => valid += 1,
            Some(reason) => *reasons.entry(reason).or_default() += 1,
            None => {}
        }
    }
    (valid, reasons)
}

fn format_reasons(reasons: &RejectionHistogram) -> String {
    if reasons.is_empty() {
        return "all valid".to_string();
    }
    reasons
        .iter()
        .map(|(reason, count)| format!("{reason}:{count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strictly better than the best so far; ties keep the earlier individual.
fn improves(best: &Option<BestIndividual>, fitness: f64) -> bool {
    best.as_ref().is_none_or(|b| fitness > b.result.fitness)
}

fn run_stats(
    generations: usize,
    total_evaluations: usize,
    best: &Option<BestIndividual>,
    start: Instant,
    stop_reason: StopReason,
) -> SearchStats {
    let elapsed_seconds = start.elapsed().as_secs_f64();
    SearchStats {
        generations,
        total_evaluations,
        best_fitness: best.as_ref().map_or(0.0, |b| b.result.fitness),
        elapsed_seconds,
        evaluations_per_second: if elapsed_seconds > 0.0 {
            total_evaluations as f64 / elapsed_seconds
        } else {
            0.0
        },
        stop_reason,
    }
}

// ============================================================================
// Genetic algorithm
// ============================================================================

/// Generational GA over variable-size topologies.
///
/// Each generation is evaluated, ranked best first, and replaced by the top
/// `elite_count` configs plus mutants of parents drawn uniformly from the
/// top half.
pub struct GeneticSearch<S = ConstraintIntegrator> {
    config: GeneticSearchConfig,
    mutator: TopologyMutator,
    evaluator: FitnessEvaluator<S>,
    rng: SearchRng,
    population: Vec<TopologyConfig>,
    /// Last evaluated generation, best first.
    ranked: Vec<(TopologyConfig, FitnessResult)>,
    history: Vec<GaGenerationRecord>,
    best: Option<BestIndividual>,
    generation: usize,
    evaluations: usize,
    stagnation_count: usize,
    cancelled: Arc<AtomicBool>,
}

impl GeneticSearch {
    /// GA backed by the built-in integrator.
    pub fn new(config: GeneticSearchConfig) -> Result<Self, SearchError> {
        Self::with_simulator(config, ConstraintIntegrator::default())
    }
}

impl<S: Simulator> GeneticSearch<S> {
    pub fn with_simulator(config: GeneticSearchConfig, simulator: S) -> Result<Self, SearchError> {
        config.validate()?;
        let mutator = TopologyMutator::new(config.mutation_rate, config.min_mass);
        let population = mutator.initial_population(config.population_size, config.seed);

        Ok(Self {
            evaluator: FitnessEvaluator::with_simulator(simulator, config.limits),
            rng: SearchRng::new(config.seed),
            mutator,
            population,
            ranked: Vec::new(),
            history: Vec::new(),
            best: None,
            generation: 0,
            evaluations: 0,
            stagnation_count: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Population awaiting evaluation.
    pub fn population(&self) -> &[TopologyConfig] {
        &self.population
    }

    pub fn best(&self) -> Option<&BestIndividual> {
        self.best.as_ref()
    }

    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        if self.generation >= self.config.generations {
            return Some(StopReason::MaxGenerations);
        }

        if let Some(target) = self.config.target_fitness
            && let Some(best) = &self.best
            && best.result.fitness >= target
        {
            return Some(StopReason::TargetReached);
        }

        if let Some(limit) = self.config.stagnation_limit
            && self.stagnation_count >= limit
        {
            return Some(StopReason::Stagnation);
        }

        None
    }

    /// Evaluate and rank the current population, record it, then breed the
    /// next one.
    fn step_generation(&mut self) -> GaGenerationRecord {
        let results = evaluate_all(&self.evaluator, &self.population);
        self.evaluations += results.len();

        let population = std::mem::take(&mut self.population);
        let mut ranked: Vec<(TopologyConfig, FitnessResult)> =
            population.into_iter().zip(results).collect();
        ranked.sort_by(|a, b| b.1.fitness.total_cmp(&a.1.fitness));

        let (leader, leader_result) = &ranked[0];
        if improves(&self.best, leader_result.fitness) {
            self.best = Some(BestIndividual {
                config: leader.clone(),
                result: leader_result.clone(),
                generation: self.generation,
                evaluation: None,
            });
            self.stagnation_count = 0;
        } else {
            self.stagnation_count += 1;
        }

        let (valid_count, rejection_reasons) = tally(ranked.iter().map(|(_, r)| r));
        let record = GaGenerationRecord {
            generation: self.generation,
            max_fitness: leader_result.fitness,
            avg_fitness: ranked.iter().map(|(_, r)| r.fitness).sum::<f64>()
                / self.config.population_size as f64,
            valid_count,
            rejection_reasons,
            best_config: leader.clone(),
        };

        if self.generation % GA_LOG_INTERVAL == 0 {
            log::info!(
                "Gen {}: Best={:.2}, Avg={:.2}, Valid={}/{} [{}]",
                record.generation,
                record.max_fitness,
                record.avg_fitness,
                record.valid_count,
                self.config.population_size,
                format_reasons(&record.rejection_reasons)
            );
        }

        let elite = self.config.elite_count.min(ranked.len());
        let mut next: Vec<TopologyConfig> = ranked[..elite].iter().map(|(c, _)| c.clone()).collect();
        let parents = (self.config.population_size / 2).clamp(1, ranked.len());
        while next.len() < self.config.population_size {
            let parent = &ranked[self.rng.index(parents)].0;
            next.push(self.mutator.mutate(parent, &mut self.rng));
        }

        self.population = next;
        self.ranked = ranked;
        self.history.push(record.clone());
        self.generation += 1;
        record
    }

    /// Run the search, calling `callback` after every generation.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> GeneticSearchResult
    where
        F: FnMut(&GaGenerationRecord),
    {
        let start = Instant::now();

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }
            let record = self.step_generation();
            callback(&record);
        };

        if let Some(best) = &self.best {
            log::info!(
                "GA finished after {} generations ({:?}): best fitness {:.2} from generation {}",
                self.generation,
                stop_reason,
                best.result.fitness,
                best.generation
            );
        }

        GeneticSearchResult {
            best: self.best.clone(),
            history: self.history.clone(),
            final_population: self.ranked.iter().map(|(c, _)| c.clone()).collect(),
            stats: run_stats(self.generation, self.evaluations, &self.best, start, stop_reason),
        }
    }

    /// Run the search (blocking).
    pub fn run(&mut self) -> GeneticSearchResult {
        self.run_with_callback(|_| {})
    }
}

// ============================================================================
// CMA-ES
// ============================================================================

/// CMA-ES over the fixed-size encoding.
///
/// Candidates are decoded, evaluated, and fed back to the strategy until the
/// evaluation budget is spent or the step size collapses. When the budget
/// cannot cover a full generation the remainder is evaluated and recorded
/// but not used to update the strategy.
pub struct CmaEsSearch<S = ConstraintIntegrator> {
    config: CmaEsSearchConfig,
    encoding: FixedEncoding,
    cma: CmaEs,
    evaluator: FitnessEvaluator<S>,
    rng: SearchRng,
    history: Vec<CmaEsGenerationRecord>,
    best: Option<BestIndividual>,
    evaluations: usize,
    stagnation_count: usize,
    converged: bool,
    cancelled: Arc<AtomicBool>,
}

impl CmaEsSearch {
    /// CMA-ES search backed by the built-in integrator.
    pub fn new(config: CmaEsSearchConfig) -> Result<Self, SearchError> {
        Self::with_simulator(config, ConstraintIntegrator::default())
    }
}

impl<S: Simulator> CmaEsSearch<S> {
    pub fn with_simulator(config: CmaEsSearchConfig, simulator: S) -> Result<Self, SearchError> {
        config.validate()?;
        let encoding = FixedEncoding::new(config.num_particles, config.bounds)?;
        let mut cma = CmaEs::new(encoding.dim(), &config.strategy)?;
        if config.strategy.clamp_mode == ClampMode::EncodingBounds {
            let (lower, upper) = encoding.bounds();
            cma = cma.with_bounds(lower, upper)?;
        }

        Ok(Self {
            evaluator: FitnessEvaluator::with_simulator(simulator, config.limits),
            rng: SearchRng::new(config.seed),
            encoding,
            cma,
            history: Vec::new(),
            best: None,
            evaluations: 0,
            stagnation_count: 0,
            converged: false,
            cancelled: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn encoding(&self) -> &FixedEncoding {
        &self.encoding
    }

    pub fn strategy(&self) -> &CmaEs {
        &self.cma
    }

    pub fn best(&self) -> Option<&BestIndividual> {
        self.best.as_ref()
    }

    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        if self.converged {
            return Some(StopReason::Converged);
        }

        if self.evaluations >= self.config.max_evaluations {
            return Some(StopReason::BudgetExhausted);
        }

        if let Some(target) = self.config.target_fitness
            && let Some(best) = &self.best
            && best.result.fitness >= target
        {
            return Some(StopReason::TargetReached);
        }

        if let Some(limit) = self.config.stagnation_limit
            && self.stagnation_count >= limit
        {
            return Some(StopReason::Stagnation);
        }

        None
    }

    fn step_generation(&mut self) -> Result<CmaEsGenerationRecord, SearchError> {
        let generation = self.cma.generation();
        let mut vectors = self.cma.sample_population(&mut self.rng)?;
        let remaining = self.config.max_evaluations - self.evaluations;
        let partial = vectors.len() > remaining;
        vectors.truncate(remaining);

        let configs = vectors
            .iter()
            .map(|v| self.encoding.decode(v))
            .collect::<Result<Vec<_>, _>>()?;
        let results = evaluate_all(&self.evaluator, &configs);

        let mut improved = false;
        for (i, (config, result)) in configs.iter().zip(&results).enumerate() {
            if improves(&self.best, result.fitness) {
                self.best = Some(BestIndividual {
                    config: config.clone(),
                    result: result.clone(),
                    generation,
                    evaluation: Some(self.evaluations + i),
                });
                improved = true;
            }
        }
        self.evaluations += results.len();
        if improved {
            self.stagnation_count = 0;
        } else {
            self.stagnation_count += 1;
        }

        let (valid_count, rejection_reasons) = tally(&results);
        let fitnesses: Vec<f64> = results.iter().map(|r| r.fitness).collect();

        let (max_fitness, avg_fitness, sigma) = if partial {
            log::debug!(
                "Budget covers only {} of {} candidates; skipping the strategy update",
                fitnesses.len(),
                self.cma.lambda()
            );
            let max = fitnesses.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let avg = fitnesses.iter().sum::<f64>() / fitnesses.len().max(1) as f64;
            (max, avg, self.cma.sigma())
        } else {
            let individuals = vectors.into_iter().zip(fitnesses).collect();
            let stats = self.cma.update(individuals)?;
            if stats.sigma < self.config.min_sigma {
                log::info!("Converged: sigma = {:.10}", stats.sigma);
                self.converged = true;
            }
            (stats.best_fitness, stats.mean_fitness, stats.sigma)
        };

        let record = CmaEsGenerationRecord {
            generation: generation + 1,
            evaluation: self.evaluations,
            max_fitness,
            avg_fitness,
            sigma,
            valid_count,
            rejection_reasons,
        };

        if record.generation % CMA_LOG_INTERVAL == 0 {
            log::info!(
                "Gen {:4}: Best={:.2}, Avg={:.2}, Sigma={:.4}, Valid={}/{} [{}]",
                record.generation,
                record.max_fitness,
                record.avg_fitness,
                record.sigma,
                record.valid_count,
                self.cma.lambda(),
                format_reasons(&record.rejection_reasons)
            );
        }

        self.history.push(record.clone());
        Ok(record)
    }

    /// Run the search, calling `callback` after every generation.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<CmaEsSearchResult, SearchError>
    where
        F: FnMut(&CmaEsGenerationRecord),
    {
        let start = Instant::now();
        log::info!(
            "CMA-ES: {} particles, dimension {} ({} binary, {} continuous), lambda {}",
            self.encoding.particle_count(),
            self.encoding.dim(),
            self.encoding.binary_len(),
            self.encoding.continuous_len(),
            self.cma.lambda()
        );

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }
            let record = self.step_generation()?;
            callback(&record);
        };

        if let Some(best) = &self.best {
            log::info!(
                "CMA-ES finished after {} evaluations ({:?}): best fitness {:.2} from generation {}",
                self.evaluations,
                stop_reason,
                best.result.fitness,
                best.generation
            );
        }

        Ok(CmaEsSearchResult {
            best: self.best.clone(),
            history: self.history.clone(),
            final_mean: self.cma.mean().to_vec(),
            final_sigma: self.cma.sigma(),
            stats: run_stats(
                self.history.len(),
                self.evaluations,
                &self.best,
                start,
                stop_reason,
            ),
        })
    }

    /// Run the search (blocking).
    pub fn run(&mut self) -> Result<CmaEsSearchResult, SearchError> {
        self.run_with_callback(|_| {})
    }
}
