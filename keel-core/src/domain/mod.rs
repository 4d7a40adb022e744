//! Core domain types
//!
//! These types describe one pipeline-step invocation, the tool configuration it
//! resolves, and the GitOps controller state it observes. They are shared by the
//! GitOps client (deserialization) and the runner (orchestration).

pub mod application;
pub mod run;
pub mod tool;
