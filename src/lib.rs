//! Martingale Simulation Library
//!
//! Core components of the Martingale paper-trading simulator: the GBM price
//! engine, the asset lifecycle manager, the portfolio ledger, and the
//! validation and persistence layers around them.

pub mod application;
pub mod config;
pub mod domain;
pub mod persistence;
pub mod task_runner;
