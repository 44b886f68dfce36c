//! Lifecycle core: the two signal sources, the reconciler, start handling and
//! the idle shutdown loop.

pub mod liveness;
pub mod monitor;
pub mod orchestrator;
pub mod startup;
pub mod status;

#[cfg(test)]
pub mod testing;
