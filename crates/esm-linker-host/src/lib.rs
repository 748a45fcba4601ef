//! Loader bridges and graph linking helpers for esm-linker.
//!
//! This crate connects the core linker to an embedder's resolution policy.
//!
//! # Components
//!
//! - [`bridge`]: The engine host hooks for `import()` and `import.meta`
//! - [`loader`]: Per-context loader registration and closure-based loaders
//! - [`graph`]: Walking a module graph to fill resolve caches, then running it
//!
//! # Dispatch Model
//!
//! 1. **Registration**: The first loader registered on an environment installs
//!    the [`LoaderBridge`] as the engine's hooks.
//! 2. **Dynamic import**: The bridge validates the referrer metadata, finds the
//!    loader of the referrer's context and returns the loader's future
//!    unchanged. Every failure before that point becomes a rejected future.
//! 3. **Import meta**: The bridge finds the module's record and lets its
//!    context's loader decorate the object; unknown modules are skipped.

pub mod bridge;
pub mod graph;
pub mod loader;

pub use bridge::LoaderBridge;
pub use graph::{ModuleResolver, link_module_graph, run_module};
pub use loader::{FnLoader, set_default_loader, set_loader_for_context};
