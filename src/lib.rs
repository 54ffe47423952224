//! AGORA — Autonomous economic agent
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod approval;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod finance;
pub mod llm;
pub mod markets;
pub mod sanitize;
pub mod shutdown;
pub mod storage;
pub mod strategies;
pub mod types;
