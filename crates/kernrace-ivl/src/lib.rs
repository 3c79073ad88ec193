#![doc = include_str!("../README.md")]

//! Kernrace intermediate verification language.
//!
//! This crate defines the IVL program model the race instrumenter and the
//! inference pipeline operate over, the region abstraction, the
//! variable-definition analysis used by candidate synthesis, program
//! simplification passes, and the frontend seam (parse / resolve / emit)
//! together with the JSON program codec.

pub mod analysis;
pub mod ast;
pub mod frontend;
pub mod gpu;
pub mod passes;
pub mod region;
