// Scan scheduler: drives periodic sweeps of every monitored queue

pub mod engine;

pub use engine::{ScanScheduler, Scheduler};
