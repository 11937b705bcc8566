//! Evolutionary search over trebuchet topologies.
//!
//! Two optimizers share one fitness function:
//!
//! - **Genetic algorithm** (`search::GeneticSearch`): variable-size
//!   topologies evolved with structural mutation (`mutation`).
//! - **CMA-ES** (`cmaes`, `search::CmaEsSearch`): continuous search over a
//!   fixed-size vector encoding (`encoding`) of `n`-particle topologies.
//!
//! Both evaluate each generation in parallel through [`FitnessEvaluator`],
//! which simulates a design and either scores it by range or rejects it with
//! a [`RejectionReason`](crate::schema::RejectionReason).
//!
//! # Example
//!
//! ```rust,no_run
//! use trebuchet_search::schema::GeneticSearchConfig;
//! use trebuchet_search::compute::evolution::GeneticSearch;
//!
//! let config = GeneticSearchConfig {
//!     population_size: 50,
//!     generations: 20,
//!     ..Default::default()
//! };
//!
//! let mut search = GeneticSearch::new(config).expect("valid config");
//! let result = search.run_with_callback(|record| {
//!     println!("Generation {}: best range = {:.2}", record.generation, record.max_fitness);
//! });
//!
//! if let Some(best) = result.best {
//!     println!("Best range: {:.2} (peak load {:.0})", best.result.range, best.result.peak_load);
//! }
//! ```
//!
//! # Determinism
//!
//! Every stochastic step draws from one [`SearchRng`] seeded from the
//! config, and parallel evaluation preserves population order, so a seed
//! reproduces the whole run.

mod cmaes;
mod encoding;
mod fitness;
mod mutation;
mod rng;
mod search;

pub use cmaes::{CmaEs, CmaEsError, GLOBAL_BOUNDS, GenerationStats};
pub use encoding::{EncodingError, FIXED_ARMTIP, FIXED_PROJECTILE, FixedEncoding};
pub use fitness::FitnessEvaluator;
pub use mutation::{MutationOp, TopologyMutator};
pub use rng::SearchRng;
pub use search::{CmaEsSearch, GeneticSearch, SearchError};
