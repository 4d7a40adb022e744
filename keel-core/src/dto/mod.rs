//! Data Transfer Objects
//!
//! Messages exchanged over the event bus: inbound triggers and outbound topics.

pub mod event;
pub mod trigger;
