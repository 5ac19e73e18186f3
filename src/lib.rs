//! Cycle-driven simulator for a multi-level CPU memory hierarchy.
//!
//! A [`simulator::Simulator`] replays a trace of load/store operations
//! against a chain of set-associative caches terminating in main memory,
//! updating cache state and accounting for access latency. The chain is
//! parameterized by a [`config::Config`] loaded from a sectioned
//! key=value file; the trace comes from a line-oriented trace file.

pub mod cache;
pub mod config;
pub mod logger;
pub mod memory;
pub mod simulator;
pub mod storage;
pub mod trace;

pub type BoxDynError = Box<dyn std::error::Error>;
pub type Result<T> = std::result::Result<T, BoxDynError>;
