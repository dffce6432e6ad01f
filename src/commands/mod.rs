//! Command implementations for the CLI
//!
//! - serve: Run the ingestion server
//! - analyze: One-shot analysis of a log file
//! - test: Test configuration validity
//! - config: Configuration display and validation

pub mod analyze;
pub mod config;
pub mod serve;
