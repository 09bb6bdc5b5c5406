//! Shared test utilities for enmasse integration tests.
//!
//! This module provides:
//! - `TestHarness` with a temp directory and a file-backed store
//! - `FailingStore`, a store wrapper that fails on a chosen write

pub mod harness;

pub use harness::{FailingStore, TestHarness};
