//! The separation engine and its parts
//!
//! Data flow: raw waveform -> [`planner`] windows -> shift passes x batched
//! model invocations ([`runner`]) -> [`stitcher`] assembles one full-length
//! estimate per model -> [`ensemble`] combines across the bag.

pub mod planner;
pub mod shift;
pub mod stitcher;

mod engine;
mod ensemble;
mod runner;

pub use engine::SeparationEngine;
