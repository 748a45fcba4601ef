//! The script engine facade.
//!
//! The linker never parses or runs script code itself. Everything it needs
//! from the engine is expressed by [`ScriptEngine`]:
//! - compiling one module unit and describing it (specifiers, identity)
//! - the engine's two-phase instantiate/evaluate protocol
//! - status, namespace and exception accessors
//! - forced termination, reachable from other threads via [`TerminationControl`]
//! - installation of the host hooks for `import()` and `import.meta`
//!
//! The engine and every handle it returns belong to the thread that created
//! them. Only [`TerminationControl`] crosses threads.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture};

use esm_linker_common::{ModuleError, SourceLocation};

use crate::context::ContextId;

/// Status of a module, as tracked by the engine.
///
/// The numeric codes match the constants a host binding publishes
/// (`kUninstantiated` = 0 through `kErrored` = 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleStatus {
    /// Compiled, not yet linked.
    Uninstantiated,
    /// Linking is in progress.
    Instantiating,
    /// Linked; the namespace exists but bindings may be uninitialized.
    Instantiated,
    /// Evaluation is in progress.
    Evaluating,
    /// Evaluation completed.
    Evaluated,
    /// Linking or evaluation failed; the exception is retained.
    Errored,
}

impl ModuleStatus {
    /// Numeric status code.
    pub const fn code(self) -> u8 {
        match self {
            Self::Uninstantiated => 0,
            Self::Instantiating => 1,
            Self::Instantiated => 2,
            Self::Evaluating => 3,
            Self::Evaluated => 4,
            Self::Errored => 5,
        }
    }

    /// Status for a numeric code.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Uninstantiated),
            1 => Some(Self::Instantiating),
            2 => Some(Self::Instantiated),
            3 => Some(Self::Evaluating),
            4 => Some(Self::Evaluated),
            5 => Some(Self::Errored),
            _ => None,
        }
    }

    /// Returns `true` if the namespace object may be observed in this status.
    pub const fn has_namespace(self) -> bool {
        matches!(self, Self::Instantiated | Self::Evaluating | Self::Evaluated)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninstantiated => "uninstantiated",
            Self::Instantiating => "instantiating",
            Self::Instantiated => "instantiated",
            Self::Evaluating => "evaluating",
            Self::Evaluated => "evaluated",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Kind of compiled unit recorded in host metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    /// Classic script.
    Script,
    /// ECMAScript module.
    Module,
    /// Compiled function body.
    Function,
}

/// Host metadata attached to a compiled unit.
///
/// The engine hands it back when the unit later triggers `import()`, so the
/// host can recover where the request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDefinedOptions {
    /// Kind of unit.
    pub script_type: ScriptType,
    /// Url the unit was compiled from.
    pub url: String,
}

impl HostDefinedOptions {
    /// Metadata for a module compiled from `url`.
    pub fn module(url: impl Into<String>) -> Self {
        Self {
            script_type: ScriptType::Module,
            url: url.into(),
        }
    }
}

/// Origin information passed to the engine at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOrigin {
    /// Resource name used in diagnostics.
    pub resource_name: String,
    /// Added to every reported line number.
    pub line_offset: u32,
    /// Added to reported columns on the first line.
    pub column_offset: u32,
    /// Metadata returned to host hooks.
    pub host_defined: HostDefinedOptions,
}

impl ScriptOrigin {
    /// Origin for a module compiled from `url`.
    pub fn module(url: &str, line_offset: u32, column_offset: u32) -> Self {
        Self {
            resource_name: url.to_string(),
            line_offset,
            column_offset,
            host_defined: HostDefinedOptions::module(url),
        }
    }
}

/// An exception reported by the engine.
#[derive(Debug, Clone)]
pub struct Exception<V> {
    /// The thrown value.
    pub value: V,
    /// Human readable description (`SyntaxError: ...`, `Uncaught ...`).
    pub message: String,
    /// Where it was thrown, if known.
    pub location: Option<SourceLocation>,
}

/// Why a dynamic import future rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportRejection<V> {
    /// The loader rejected with a script value.
    Thrown(V),
    /// The host rejected before or while invoking the loader.
    Host(ModuleError),
}

/// Result of a dynamic `import()`; resolves to the module namespace.
///
/// The future is returned to the engine immediately and driven to completion
/// by the host's scheduler.
pub type ImportFuture<V> = LocalBoxFuture<'static, Result<V, ImportRejection<V>>>;

/// An import future that has already rejected with a host error.
pub fn rejected_import<V: 'static>(error: ModuleError) -> ImportFuture<V> {
    futures::future::ready(Err(ImportRejection::Host(error))).boxed_local()
}

/// Forced-termination control for an engine.
///
/// Implementations must be callable from any thread: watchdogs request
/// termination from timer and signal threads while the owning thread is
/// blocked inside [`ScriptEngine::evaluate`].
pub trait TerminationControl: Send + Sync {
    /// Ask the engine to abort the running script at its next checkpoint.
    fn terminate_execution(&self);

    /// Clear a pending or completed termination so scripts can run again.
    fn cancel_terminate_execution(&self);

    /// Returns `true` while a termination is pending.
    fn is_execution_terminating(&self) -> bool;
}

/// Hooks the engine calls back into the host.
pub trait HostHooks<E: ScriptEngine> {
    /// Called for `import(specifier)` in code compiled with `referrer`
    /// metadata (`None` if the unit carried none).
    fn import_module_dynamically(
        &self,
        context: ContextId,
        referrer: Option<&HostDefinedOptions>,
        specifier: &str,
    ) -> ImportFuture<E::Value>;

    /// Called once per module, the first time its `import.meta` is read.
    fn initialize_import_meta(&self, context: ContextId, module: &E::Module, meta: &E::Value);
}

/// The engine module facade.
///
/// `Module` is an opaque handle: cheap to clone, compared by identity via
/// [`ScriptEngine::same_module`]. `identity_hash` is stable per module but
/// not unique.
pub trait ScriptEngine: 'static {
    /// Handle to one compiled module unit.
    type Module: Clone + fmt::Debug + 'static;

    /// A script value.
    type Value: Clone + fmt::Debug + 'static;

    /// Compile module source in `context`.
    fn compile(
        &self,
        context: ContextId,
        source: &str,
        origin: ScriptOrigin,
    ) -> Result<Self::Module, Exception<Self::Value>>;

    /// Non-unique identity hash of a module.
    fn identity_hash(&self, module: &Self::Module) -> u32;

    /// Returns `true` if both handles refer to the same module.
    fn same_module(&self, a: &Self::Module, b: &Self::Module) -> bool;

    /// Specifiers the module requests, in source order.
    fn requested_specifiers(&self, module: &Self::Module) -> Vec<String>;

    /// Instantiate the module and every module reachable from it.
    ///
    /// The engine traverses the graph and calls `resolve` once per specifier
    /// of every module it visits. `None` aborts instantiation.
    fn instantiate(
        &self,
        context: ContextId,
        module: &Self::Module,
        resolve: &mut dyn FnMut(&Self::Module, &str) -> Option<Self::Module>,
    ) -> Result<(), Exception<Self::Value>>;

    /// Evaluate an instantiated module, returning its completion value.
    fn evaluate(
        &self,
        context: ContextId,
        module: &Self::Module,
    ) -> Result<Self::Value, Exception<Self::Value>>;

    /// Current status.
    fn status(&self, module: &Self::Module) -> ModuleStatus;

    /// Namespace object. Only meaningful once instantiated.
    fn namespace(&self, module: &Self::Module) -> Self::Value;

    /// The exception retained by an errored module.
    fn exception(&self, module: &Self::Module) -> Option<Self::Value>;

    /// Thread-safe termination control for this engine.
    fn termination_control(&self) -> Arc<dyn TerminationControl>;

    /// Install the host hooks, replacing any previous ones.
    fn set_host_hooks(&self, hooks: Rc<dyn HostHooks<Self>>)
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for code in 0..=5 {
            let status = ModuleStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(ModuleStatus::from_code(6), None);
    }

    #[test]
    fn test_namespace_visibility_by_status() {
        assert!(!ModuleStatus::Uninstantiated.has_namespace());
        assert!(!ModuleStatus::Instantiating.has_namespace());
        assert!(ModuleStatus::Instantiated.has_namespace());
        assert!(ModuleStatus::Evaluating.has_namespace());
        assert!(ModuleStatus::Evaluated.has_namespace());
        assert!(!ModuleStatus::Errored.has_namespace());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ModuleStatus::Evaluated.to_string(), "evaluated");
        assert_eq!(ModuleStatus::Errored.to_string(), "errored");
    }

    #[test]
    fn test_module_origin_carries_metadata() {
        let origin = ScriptOrigin::module("file:///a.mjs", 2, 4);

        assert_eq!(origin.resource_name, "file:///a.mjs");
        assert_eq!(origin.line_offset, 2);
        assert_eq!(origin.column_offset, 4);
        assert_eq!(origin.host_defined.script_type, ScriptType::Module);
        assert_eq!(origin.host_defined.url, "file:///a.mjs");
    }

    #[test]
    fn test_rejected_import_is_ready() {
        let future = rejected_import::<u32>(ModuleError::configuration("no loader"));
        let result = tokio_test::block_on(future);

        assert!(matches!(
            result,
            Err(ImportRejection::Host(ModuleError::Configuration { .. }))
        ));
    }
}
