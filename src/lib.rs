//! reqplan - declarative HTTP request plans
//!
//! Loads YAML or JSON plans of HTTP requests, resolves templates and
//! expressions between requests, and executes one or more plans with
//! assertions, repeats and bounded parallelism.

pub mod cli;
pub mod core;
pub mod engine;
pub mod errors;
pub mod output;
pub mod plan;
pub mod signals;
pub mod status;
pub mod template;
pub mod transport;
