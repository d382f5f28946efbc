//! The cleaning pipeline: probe, score, protect, execute, orchestrate.

pub mod executor;
pub mod probe;
pub mod run;
pub mod scoring;
pub mod whitelist;
