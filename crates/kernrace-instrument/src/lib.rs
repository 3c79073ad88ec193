#![doc = include_str!("../README.md")]
//!
//! The crate is organized around a run-scoped [`context::RaceCheckContext`]:
//! every component that declares or looks up synthesized state goes through
//! it, so one run never sees two declaration objects for the same name.

use thiserror::Error;

pub mod access;
pub mod callsite;
pub mod candidates;
pub mod context;
pub mod shadow;

/// Fatal instrumentation failures. These indicate the upstream front end
/// produced a program outside this crate's input contract, not a bug in the
/// kernel under analysis.
#[derive(Debug, Error)]
pub enum InstrumentationError {
    #[error("instrumentation contract violation: {0}")]
    ContractViolation(String),
}
