//! # mmtable Configuration Module
//!
//! This module centralizes configuration for mmtable: compile-time constants
//! that fix the on-disk layout, and the runtime [`TableConfig`] that carries
//! the operational parameters (lock timeout, growth increment, initial
//! capacity, clock-skew allowance).
//!
//! ## Module Organization
//!
//! - [`constants`]: Layout constants and operational defaults
//! - [`table`]: `TableConfig` builder and environment overrides

pub mod constants;
pub mod table;

pub use constants::*;
pub use table::TableConfig;
