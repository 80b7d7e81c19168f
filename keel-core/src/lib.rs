//! Keel Core
//!
//! Core types and abstractions for the Keel pipeline engine.
//!
//! This crate contains:
//! - Domain types: the pipeline specification, steps, volumes and execution state
//! - Lookups: registry credentials and file payloads referenced by steps

pub mod auth;
pub mod domain;
pub mod error;

pub use error::{CoreError, Result};
