//! Keel Core
//!
//! Core types shared by the Keel GitOps sync services.
//!
//! This crate contains:
//! - Domain types: pipeline run context, tool configuration, GitOps application state
//! - DTOs: inbound trigger messages and outbound event topics

pub mod domain;
pub mod dto;
