//! Trebuchet search - evolutionary discovery of trebuchet topologies.
//!
//! A trebuchet is modelled as point masses joined by rods, pins and sliders.
//! Each design is simulated, checked for physical validity (peak constraint
//! force, energy conservation) and scored by its normalized throwing range.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Topology and search configuration types, fitness verdicts and
//!   run histories
//! - `compute`: Constraint integration, trajectory analysis and the
//!   evolutionary optimizers
//!
//! # Example
//!
//! ```rust,no_run
//! use trebuchet_search::{
//!     compute::evolution::CmaEsSearch,
//!     schema::CmaEsSearchConfig,
//! };
//!
//! let config = CmaEsSearchConfig {
//!     max_evaluations: 2_000,
//!     ..Default::default()
//! };
//!
//! let mut search = CmaEsSearch::new(config).expect("valid config");
//! let result = search.run().expect("search failed");
//!
//! println!(
//!     "Best range after {} evaluations: {:.2}",
//!     result.stats.total_evaluations, result.stats.best_fitness
//! );
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{CmaEsSearch, FitnessEvaluator, GeneticSearch, SearchError};
pub use compute::{ConstraintIntegrator, Simulator};
pub use schema::{FitnessResult, SearchConfig, TopologyConfig};
