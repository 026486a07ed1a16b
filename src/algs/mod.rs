//! Communication backends and the collectives built on them.

pub mod communicator;
pub mod exchange;
pub mod redistribute;
pub mod wire;

pub use redistribute::VectorRedistributor;
