//! Core utilities and types shared across all Berth crates

pub mod error;
pub mod error_builder;
pub mod plugin;
pub mod problemdetails;
pub mod settings;
pub mod types;

pub use problemdetails::{Problem, ProblemDetails};

// Re-export commonly used types
pub use error::*;
pub use error_builder::*;
pub use settings::*;
pub use types::*;

// Re-export external dependencies
pub use anyhow;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
