//! # sandbox-test
//!
//! Integration tests for the SQL sandbox.
//!
//! This crate contains:
//! - End-to-end tests (`tests/e2e_integration.rs`)
//! - PostgreSQL tests, run when `SANDBOX_TEST_POSTGRES_URL` is set
//! - Shared utilities for throwaway databases and generated scripts

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;

/// Script generators
pub mod workload;

pub use utils::TestDatabase;
