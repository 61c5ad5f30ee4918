//! `mg-domain` — shared types for mcpguard.
//!
//! This crate holds everything the other crates need to agree on:
//! - [`error::Error`] — the shared error type.
//! - [`config`] — permissive (raw) config types deserialized from the JSON
//!   governance config file.
//! - [`plan`] — the validated, immutable [`plan::DeploymentPlan`] produced
//!   from a raw config, plus front-end/port planning.
//! - [`tool`] — the tool-call result model (`CallResult`, `ContentBlock`).

pub mod config;
pub mod error;
pub mod plan;
pub mod tool;

pub use error::{Error, Result};
pub use plan::DeploymentPlan;
pub use tool::{CallResult, ContentBlock};
