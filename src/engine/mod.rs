//! Plan execution engine
//!
//! `request` holds the per-request state machine, `runner` executes one
//! plan, `plans` orchestrates one or more plans with bounded parallelism.

pub mod plans;
pub mod request;
pub mod runner;

pub use plans::{Counters, PlansRunner, RunOutcome};
pub use request::{Assertion, ParsedRequest, RequestState, StateKind};
pub use runner::PlanRunner;
