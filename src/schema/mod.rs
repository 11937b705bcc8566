//! Schema module - Topology and search configuration types.

mod search;
mod topology;

pub use search::*;
pub use topology::*;
