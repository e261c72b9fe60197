//! Crop Analytics gateway
//!
//! Accepts dataset uploads over HTTP, hands them to external analysis
//! workers and returns the workers' JSON results.

pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod runner;
pub mod staging;
pub mod workers;
