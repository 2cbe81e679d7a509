//! # Tempo Common Library
//!
//! Shared code for the tempo job engine:
//! - Error type used by store and configuration code
//! - Configuration file loading and default locations
//! - Database initialization and schema
//! - Job row models and status values
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
