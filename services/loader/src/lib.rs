//! Dubai population data loader
//!
//! Loads `sectors.csv`, `communities.csv` and `population.csv` into the
//! `dubai` schema as a full refresh:
//! - Validate that all input files exist before touching the database
//! - Read and sanitise each file (banner rows, missing fields)
//! - Load sectors, then communities, then population, resolving natural
//!   keys to the ids the store assigns
//! - Create secondary indexes
//! - Re-query counts and the year distribution
//!
//! Record-level problems are counted and logged, never fatal.

pub mod error;
pub mod indexes;
pub mod memory;
pub mod outcome;
pub mod phases;
pub mod pipeline;
pub mod records;
pub mod resolver;
pub mod sanitize;
pub mod store;
pub mod verify;

#[cfg(test)]
mod integ_tests;

pub use error::{PipelineError, Stage};
pub use memory::MemoryStore;
pub use outcome::{LoadOutcome, SkipReason};
pub use pipeline::{Pipeline, PipelineConfig, PipelineSummary};
pub use store::{PgStore, Store};
