//! Shared test utilities for docanalyst integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a scheduler to an in-memory store and temp directories
//! - Scripted stages and extractors standing in for the reasoning service
//! - A builder for scheduler configurations with test-sized timings

pub mod builders;
pub mod harness;
pub mod stubs;

pub use builders::*;
pub use harness::{TestHarness, PDF_BYTES};
pub use stubs::*;
