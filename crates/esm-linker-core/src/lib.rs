//! Module records, registry, linker and evaluator for esm-linker.
//!
//! This crate drives a script engine's module protocol on behalf of an
//! embedder:
//! - [`ScriptEngine`]: The engine facade (compile, instantiate, evaluate, hooks)
//! - [`Environment`] / [`ModuleContext`]: Contexts and their module registries
//! - [`ModuleRecord`]: One compiled module with its resolve cache
//! - [`Watchdog`] / [`SigintWatchdog`]: Evaluation guards
//! - [`Loader`]: The embedder's resolution policy, one per context
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Environment                         │
//! │  (One engine, single-threaded)                          │
//! │  - Host hooks installed once                            │
//! │  - Configuration defaults                               │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ModuleContext                        │
//! │  (Main context plus sandboxes)                          │
//! │  - Registry: identity hash -> bucket of records         │
//! │  - Loader slot                                          │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ModuleRecord                         │
//! │  (Per compiled module)                                  │
//! │  - Resolve cache until linked                           │
//! │  - instantiate() once, evaluate() under watchdogs       │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod context;
pub mod engine;
pub mod evaluator;
pub mod linker;
pub mod loader;
pub mod module;
pub mod registry;
pub mod watchdog;

pub use cache::ResolveCache;
pub use context::{ContextId, CreateOptions, Environment, ModuleContext, WeakEnvironment};
pub use engine::{
    Exception, HostDefinedOptions, HostHooks, ImportFuture, ImportRejection, ModuleStatus,
    ScriptEngine, ScriptOrigin, ScriptType, TerminationControl, rejected_import,
};
pub use evaluator::EvaluateOptions;
pub use loader::{Loader, LoaderFault};
pub use module::ModuleRecord;
pub use registry::ModuleRegistry;
pub use watchdog::{SigintWatchdog, Watchdog};
