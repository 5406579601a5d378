// Common library for the queue janitor: configuration, store access, and the recovery loop

pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod models;
pub mod resolver;
pub mod scheduler;
pub mod staleness;
pub mod store;
pub mod telemetry;
