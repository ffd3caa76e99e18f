//! Multi-stage exam item generation and review pipeline.
//!
//! A batch request moves through a fixed set of stages: a coordinator
//! dispatches it, a generator produces candidate items behind a diversity
//! gate, a post-processor normalizes and re-validates them, a quality scorer
//! gates them on an eight-dimension rubric, a human review stage suspends
//! the run, and an analytics stage persists approved items and emits the
//! batch report that terminates the run. Runs survive arbitrary suspension
//! gaps through JSON checkpoints keyed by run id.

pub mod checkpoint;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod diversity;
pub mod engine;
pub mod error;
pub mod item;
pub mod quality;
pub mod report;
pub mod routing;
