//! Common types, errors, and configuration for esm-linker.
//!
//! This crate provides shared functionality used across the esm-linker workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Source locations and the error annotation used when reporting them
//! - Configuration structures and TOML loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{ExecutionConfig, LinkerConfig};
pub use config_file::ConfigFileError;
pub use error::{LinkError, ModuleError, SourceLocation};
