//! ECMAScript module graph linker for embedded script engines.
//!
//! This crate re-exports the workspace:
//! - [`common`]: Errors, source locations and configuration
//! - [`linker`]: The engine facade, contexts, module records, linker and evaluator
//! - [`host`]: Loader bridges, loader registration and graph helpers
//!
//! # Lifecycle
//!
//! ```text
//! create_module ──► resolve_dependency* ──► instantiate ──► evaluate
//!       │                                        │              │
//!   registered                              linked (once)   watchdogs
//! ```

pub use esm_linker_common as common;
pub use esm_linker_core as linker;
pub use esm_linker_host as host;

pub use esm_linker_common::{
    ConfigFileError, ExecutionConfig, LinkError, LinkerConfig, ModuleError, SourceLocation,
};
pub use esm_linker_core::{
    ContextId, CreateOptions, EvaluateOptions, Environment, Loader, LoaderFault, ModuleContext,
    ModuleRecord, ModuleStatus, ScriptEngine,
};
pub use esm_linker_host::{
    FnLoader, LoaderBridge, ModuleResolver, link_module_graph, run_module, set_default_loader,
    set_loader_for_context,
};

pub mod telemetry;
