//! Compute module - Simulation, trajectory analysis and evolutionary search.

mod analysis;
mod linalg;
mod simulate;

pub mod evolution;

pub use analysis::*;
pub use linalg::*;
pub use simulate::*;
