//! Built-in node executors, grouped by family.

pub mod concurrency;
pub mod control_flow;
pub mod executor;
pub mod http;
pub mod iteration;
pub mod resilience;
pub mod stateful;
pub mod utils;
pub mod value;

pub use executor::*;
