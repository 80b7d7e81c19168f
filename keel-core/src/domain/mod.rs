//! Core domain types
//!
//! This module contains the structures describing one pipeline run. The
//! specification is owned by the caller; the engine only ever reads it.

pub mod log;
pub mod pipeline;
pub mod state;
pub mod step;
