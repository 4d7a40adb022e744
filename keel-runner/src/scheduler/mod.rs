//! Scheduler layer for the runner
//!
//! This layer consumes triggers from the event bus and hands each one to a
//! bounded worker pool. It owns the lifecycle of in-flight runs from dispatch
//! to shutdown.

pub mod dispatcher;

pub use dispatcher::Dispatcher;
