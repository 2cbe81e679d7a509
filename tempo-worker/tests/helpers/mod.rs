//! Test Helper Utilities
//!
//! Shared utilities for testing tempo-worker

#![allow(dead_code)]

pub mod db_utils;
pub mod scripted_tools;

pub use db_utils::{
    backdate_started_at, create_test_db, hold_write_lock, open_pool_with_busy_timeout, seed_track,
    wait_for_analysis_status, TEST_DB_FILE,
};
pub use scripted_tools::{regular_beats, ScriptedTools, ToolStep};
