//! SIBYL: prediction-market decision engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod platforms;
pub mod market;
pub mod strategy;
pub mod risk;
pub mod engine;
pub mod storage;
pub mod backtest;
