//! # hitoe-actor
//!
//! Heart-rate actor library for hitoe sensors.
//!
//! This library provides the connection workflow, periodic reports and a
//! simulated sensor driver built on `hitoe-core`.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod cli;
pub mod config;
pub mod logging;
pub mod report;
pub mod simulator;
pub mod state;
pub mod workflow;
