//! Oracle operator: prediction-market resolution service.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod contract;
pub mod ledger;
pub mod pricefeed;
pub mod engine;
pub mod server;
