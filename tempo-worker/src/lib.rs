//! tempo-worker library interface
//!
//! Background job engine: claims analysis and render jobs from the shared
//! job store, estimates track tempo, renders time-stretched audio, and writes
//! results back. Exposed as a library for integration testing.

pub mod config;
pub mod db;
pub mod error;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod tools;
pub mod utils;

pub use crate::error::{ClaimError, JobError, JobResult};
pub use crate::scheduler::{JobOutcome, Scheduler, Tick};
