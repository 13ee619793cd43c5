//! Mempool Flow Service - node gateway, summary cache and estimation runs
//!
//! Library side of the `mempool-flow` binary, exposed for integration tests.

pub mod bitcoin;
pub mod cli;
pub mod config;
pub mod persistence;
pub mod queue;
pub mod service;
