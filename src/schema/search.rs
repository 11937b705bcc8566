//! Search configuration, fitness verdicts and run history.
//!
//! Configuration types use snake_case JSON like the rest of the schema.
//! Verdicts and history records serialize camelCase because plotting and
//! reporting tools downstream key on those names.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::TopologyConfig;

// ============================================================================
// Configuration
// ============================================================================

/// Top-level search configuration, tagged by algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SearchConfig {
    /// Variable-length GA mutating topology structure directly.
    GeneticAlgorithm(GeneticSearchConfig),
    /// CMA-ES over a fixed-size vector encoding.
    CmaEs(CmaEsSearchConfig),
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self::GeneticAlgorithm(GeneticSearchConfig::default())
    }
}

impl SearchConfig {
    /// Parse and validate a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, SearchConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SearchConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), SearchConfigError> {
        match self {
            Self::GeneticAlgorithm(config) => config.validate(),
            Self::CmaEs(config) => config.validate(),
        }
    }
}

/// Physical validity thresholds applied by the fitness evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidityLimits {
    /// Largest constraint force a design may see after the first step.
    #[serde(default = "default_max_force")]
    pub max_force: f64,
    /// Allowed relative drift of total energy.
    #[serde(default = "default_energy_tolerance")]
    pub energy_tolerance: f64,
}

impl Default for ValidityLimits {
    fn default() -> Self {
        Self {
            max_force: default_max_force(),
            energy_tolerance: default_energy_tolerance(),
        }
    }
}

fn default_max_force() -> f64 {
    15000.0
}
fn default_energy_tolerance() -> f64 {
    0.05
}

impl ValidityLimits {
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        if !(self.max_force > 0.0) {
            return Err(SearchConfigError::InvalidLimits(format!(
                "max_force must be positive, got {}",
                self.max_force
            )));
        }
        if !(self.energy_tolerance >= 0.0) {
            return Err(SearchConfigError::InvalidLimits(format!(
                "energy_tolerance must be non-negative, got {}",
                self.energy_tolerance
            )));
        }
        Ok(())
    }
}

/// Genetic algorithm over variable-size topologies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticSearchConfig {
    #[serde(default = "default_ga_population")]
    pub population_size: usize,
    /// Number of generations to evolve.
    #[serde(default = "default_ga_generations")]
    pub generations: usize,
    /// Individuals copied unchanged into the next generation.
    #[serde(default = "default_elite_count")]
    pub elite_count: usize,
    /// Probability that each mutation pass applies an operator.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Lower bound for every particle mass.
    #[serde(default = "default_min_mass")]
    pub min_mass: f64,
    #[serde(default = "default_ga_seed")]
    pub seed: u64,
    #[serde(default)]
    pub limits: ValidityLimits,
    /// Stop once the best fitness reaches this value.
    #[serde(default)]
    pub target_fitness: Option<f64>,
    /// Stop after this many generations without improvement.
    #[serde(default)]
    pub stagnation_limit: Option<usize>,
}

impl Default for GeneticSearchConfig {
    fn default() -> Self {
        Self {
            population_size: default_ga_population(),
            generations: default_ga_generations(),
            elite_count: default_elite_count(),
            mutation_rate: default_mutation_rate(),
            min_mass: default_min_mass(),
            seed: default_ga_seed(),
            limits: ValidityLimits::default(),
            target_fitness: None,
            stagnation_limit: None,
        }
    }
}

fn default_ga_population() -> usize {
    100
}
fn default_ga_generations() -> usize {
    1000
}
fn default_elite_count() -> usize {
    10
}
fn default_mutation_rate() -> f64 {
    0.3
}
fn default_min_mass() -> f64 {
    1.0
}
fn default_ga_seed() -> u64 {
    54321
}

impl GeneticSearchConfig {
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        if self.population_size < 2 {
            return Err(SearchConfigError::PopulationTooSmall);
        }
        if self.elite_count > self.population_size {
            return Err(SearchConfigError::TooManyElites {
                elite: self.elite_count,
                population: self.population_size,
            });
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(SearchConfigError::InvalidMutationRate(self.mutation_rate));
        }
        if !(self.min_mass > 0.0) {
            return Err(SearchConfigError::InvalidBounds(format!(
                "min_mass must be positive, got {}",
                self.min_mass
            )));
        }
        self.limits.validate()
    }
}

/// Per-field bounds used to (de)normalize the continuous part of an encoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncodingBounds {
    #[serde(default = "default_position_bounds")]
    pub pos_x: (f64, f64),
    #[serde(default = "default_position_bounds")]
    pub pos_y: (f64, f64),
    /// Lower end doubles as the minimum particle mass.
    #[serde(default = "default_mass_bounds")]
    pub mass: (f64, f64),
}

impl Default for EncodingBounds {
    fn default() -> Self {
        Self {
            pos_x: default_position_bounds(),
            pos_y: default_position_bounds(),
            mass: default_mass_bounds(),
        }
    }
}

fn default_position_bounds() -> (f64, f64) {
    (350.0, 650.0)
}
fn default_mass_bounds() -> (f64, f64) {
    (1.0, 100.0)
}

impl EncodingBounds {
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        let check = |bounds: (f64, f64), name: &str| {
            if bounds.0 < bounds.1 && bounds.0.is_finite() && bounds.1.is_finite() {
                Ok(())
            } else {
                Err(SearchConfigError::InvalidBounds(format!(
                    "{} min ({}) must be below max ({})",
                    name, bounds.0, bounds.1
                )))
            }
        };
        check(self.pos_x, "pos_x")?;
        check(self.pos_y, "pos_y")?;
        check(self.mass, "mass")?;
        if self.mass.0 <= 0.0 {
            return Err(SearchConfigError::InvalidBounds(format!(
                "mass min must be positive, got {}",
                self.mass.0
            )));
        }
        Ok(())
    }
}

/// How CMA-ES builds its sampling basis from the covariance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EigenMode {
    /// `B = I`, `D = sqrt(diag(C))`. Ignores off-diagonal structure.
    #[default]
    Diagonal,
    /// Full symmetric eigendecomposition of `C`.
    Full,
}

/// How CMA-ES keeps sampled vectors in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClampMode {
    /// Every coordinate clamped to [-1, 1].
    #[default]
    Global,
    /// Each coordinate clamped to the encoding's own range for that slot.
    EncodingBounds,
}

/// CMA-ES strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmaEsConfig {
    /// Initial step size (sigma).
    #[serde(default = "default_cma_sigma")]
    pub initial_sigma: f64,
    /// Offspring per generation (lambda). `None` uses `4 + floor(3 ln dim)`.
    #[serde(default)]
    pub population_size: Option<usize>,
    /// Parents per generation (mu). `None` uses `floor(lambda / 2)`.
    #[serde(default)]
    pub parent_count: Option<usize>,
    /// Starting mean. `None` starts at 0.5 in every coordinate.
    #[serde(default)]
    pub initial_mean: Option<Vec<f64>>,
    #[serde(default)]
    pub eigen_mode: EigenMode,
    #[serde(default)]
    pub clamp_mode: ClampMode,
}

impl Default for CmaEsConfig {
    fn default() -> Self {
        Self {
            initial_sigma: default_cma_sigma(),
            population_size: None,
            parent_count: None,
            initial_mean: None,
            eigen_mode: EigenMode::default(),
            clamp_mode: ClampMode::default(),
        }
    }
}

fn default_cma_sigma() -> f64 {
    0.3
}

impl CmaEsConfig {
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        if !(self.initial_sigma > 0.0 && self.initial_sigma.is_finite()) {
            return Err(SearchConfigError::InvalidSigma(self.initial_sigma));
        }
        if let Some(lambda) = self.population_size
            && lambda < 2
        {
            return Err(SearchConfigError::PopulationTooSmall);
        }
        if let Some(mu) = self.parent_count {
            let lambda = self.population_size.unwrap_or(usize::MAX);
            if mu == 0 || mu > lambda {
                return Err(SearchConfigError::InvalidParentCount { mu, lambda });
            }
        }
        Ok(())
    }
}

/// CMA-ES search over fixed-size encoded topologies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmaEsSearchConfig {
    /// Particles in every encoded topology.
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Fitness evaluations the run may spend.
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: usize,
    #[serde(default = "default_cma_seed")]
    pub seed: u64,
    #[serde(default)]
    pub bounds: EncodingBounds,
    #[serde(default = "default_search_strategy")]
    pub strategy: CmaEsConfig,
    #[serde(default)]
    pub limits: ValidityLimits,
    /// Stop once sigma collapses below this value.
    #[serde(default = "default_min_sigma")]
    pub min_sigma: f64,
    #[serde(default)]
    pub target_fitness: Option<f64>,
    #[serde(default)]
    pub stagnation_limit: Option<usize>,
}

impl Default for CmaEsSearchConfig {
    fn default() -> Self {
        Self {
            num_particles: default_num_particles(),
            max_evaluations: default_max_evaluations(),
            seed: default_cma_seed(),
            bounds: EncodingBounds::default(),
            strategy: default_search_strategy(),
            limits: ValidityLimits::default(),
            min_sigma: default_min_sigma(),
            target_fitness: None,
            stagnation_limit: None,
        }
    }
}

fn default_num_particles() -> usize {
    8
}
fn default_max_evaluations() -> usize {
    100_000
}
fn default_cma_seed() -> u64 {
    12345
}
fn default_min_sigma() -> f64 {
    1e-8
}
fn default_search_strategy() -> CmaEsConfig {
    CmaEsConfig {
        population_size: Some(20),
        ..CmaEsConfig::default()
    }
}

impl CmaEsSearchConfig {
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        if self.num_particles < 4 {
            return Err(SearchConfigError::TooFewParticles(self.num_particles));
        }
        if self.max_evaluations == 0 {
            return Err(SearchConfigError::NoBudget);
        }
        if !(self.min_sigma >= 0.0) {
            return Err(SearchConfigError::InvalidSigma(self.min_sigma));
        }
        self.bounds.validate()?;
        self.strategy.validate()?;
        self.limits.validate()
    }
}

// ============================================================================
// Fitness verdicts
// ============================================================================

/// Why a design scored zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The integrator produced no trajectory.
    SimulationFailed,
    /// Range came out negative or non-finite.
    InvalidRange,
    /// Peak constraint force exceeded the limit.
    ForceExceeded,
    /// Total energy drifted beyond tolerance.
    EnergyNotConserved,
    /// Evaluation failed unexpectedly.
    Exception,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimulationFailed => "simulation_failed",
            Self::InvalidRange => "invalid_range",
            Self::ForceExceeded => "force_exceeded",
            Self::EnergyNotConserved => "energy_not_conserved",
            Self::Exception => "exception",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count of rejected individuals per reason.
pub type RejectionHistogram = BTreeMap<RejectionReason, usize>;

/// Outcome of evaluating one topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitnessResult {
    /// Search objective; 0 for any invalid design.
    pub fitness: f64,
    pub range: f64,
    pub peak_load: f64,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
    pub energy_conserved: bool,
    pub num_particles: usize,
    pub num_constraints: usize,
    /// Failure message for `exception` verdicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FitnessResult {
    /// A valid design scored by its range.
    pub fn accepted(range: f64, peak_load: f64, num_particles: usize, num_constraints: usize) -> Self {
        Self {
            fitness: range,
            range,
            peak_load,
            valid: true,
            reason: None,
            energy_conserved: true,
            num_particles,
            num_constraints,
            error: None,
        }
    }

    /// An invalid design with zeroed fitness.
    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            fitness: 0.0,
            range: 0.0,
            peak_load: 0.0,
            valid: false,
            reason: Some(reason),
            energy_conserved: false,
            num_particles: 0,
            num_constraints: 0,
            error: None,
        }
    }

    pub fn with_measurements(mut self, range: f64, peak_load: f64) -> Self {
        self.range = range;
        self.peak_load = peak_load;
        self
    }

    pub fn with_counts(mut self, num_particles: usize, num_constraints: usize) -> Self {
        self.num_particles = num_particles;
        self.num_constraints = num_constraints;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ============================================================================
// History and results
// ============================================================================

/// Best design seen during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestIndividual {
    pub config: TopologyConfig,
    #[serde(flatten)]
    pub result: FitnessResult,
    /// Generation in which it was first seen.
    pub generation: usize,
    /// Evaluation index within the run, when the driver counts evaluations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<usize>,
}

/// Per-generation GA statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaGenerationRecord {
    pub generation: usize,
    pub max_fitness: f64,
    pub avg_fitness: f64,
    pub valid_count: usize,
    pub rejection_reasons: RejectionHistogram,
    /// Snapshot of the generation's best topology.
    pub best_config: TopologyConfig,
}

/// Per-generation CMA-ES statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmaEsGenerationRecord {
    pub generation: usize,
    /// Evaluations spent once this generation finished.
    pub evaluation: usize,
    pub max_fitness: f64,
    pub avg_fitness: f64,
    /// Step size after this generation's update.
    pub sigma: f64,
    pub valid_count: usize,
    pub rejection_reasons: RejectionHistogram,
}

/// Reason a search stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached the configured generation count.
    MaxGenerations,
    /// Spent the evaluation budget.
    BudgetExhausted,
    /// Step size collapsed.
    Converged,
    /// Reached target fitness.
    TargetReached,
    /// Stagnation limit hit.
    Stagnation,
    /// User cancelled.
    Cancelled,
}

/// Run-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    pub generations: usize,
    pub total_evaluations: usize,
    pub best_fitness: f64,
    pub elapsed_seconds: f64,
    pub evaluations_per_second: f64,
    pub stop_reason: StopReason,
}

/// Output of a GA run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneticSearchResult {
    pub best: Option<BestIndividual>,
    pub history: Vec<GaGenerationRecord>,
    /// Last evaluated population, sorted best first.
    pub final_population: Vec<TopologyConfig>,
    pub stats: SearchStats,
}

/// Output of a CMA-ES run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmaEsSearchResult {
    pub best: Option<BestIndividual>,
    pub history: Vec<CmaEsGenerationRecord>,
    pub final_mean: Vec<f64>,
    pub final_sigma: f64,
    pub stats: SearchStats,
}

// ============================================================================
// Validation
// ============================================================================

/// Search configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchConfigError {
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Elite count {elite} exceeds population size {population}")]
    TooManyElites { elite: usize, population: usize },
    #[error("Mutation rate must be within [0, 1], got {0}")]
    InvalidMutationRate(f64),
    #[error("Fixed encodings need at least 4 particles, got {0}")]
    TooFewParticles(usize),
    #[error("Evaluation budget must be positive")]
    NoBudget,
    #[error("Step size must be positive and finite, got {0}")]
    InvalidSigma(f64),
    #[error("Parent count {mu} must be within 1..={lambda}")]
    InvalidParentCount { mu: usize, lambda: usize },
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),
    #[error("Invalid validity limits: {0}")]
    InvalidLimits(String),
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
