//! Keel Engine
//!
//! Container-backed execution of pipeline steps.
//!
//! The [`Engine`] turns each step of a [`PipelineSpec`](keel_core::domain::pipeline::PipelineSpec)
//! into a container managed by a [`ContainerRuntime`]:
//!
//! ```text
//! setup -> (create -> start -> { tail | wait })* -> destroy
//! ```
//!
//! # Example
//!
//! ```no_run
//! use keel_engine::{ContainerEngine, DockerRuntime, Engine};
//! use keel_core::domain::pipeline::PipelineSpec;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = PipelineSpec::from_json(&std::fs::read_to_string("pipeline.json")?)?;
//!     let engine = ContainerEngine::new(Arc::new(DockerRuntime::connect()?));
//!
//!     engine.setup(&spec).await?;
//!     for step in &spec.steps {
//!         engine.create(&spec, step).await?;
//!         engine.start(&spec, step).await?;
//!         let state = engine.wait(&spec, step).await?;
//!         println!("{} exited with {}", step.metadata.name, state.exit_code);
//!     }
//!     engine.destroy(&spec).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod convert;
pub mod demux;
pub mod engine;
pub mod error;
pub mod reference;
pub mod runtime;
pub mod tail;

pub use engine::{CleanupFailure, CleanupReport, ContainerEngine, Engine, IMAGE_NOT_FOUND_RETRIES};
pub use error::{EngineError, Result};
pub use reference::{ImageReference, parse_image};
pub use runtime::{ContainerRuntime, DockerRuntime, RuntimeError};
pub use tail::LogReader;
