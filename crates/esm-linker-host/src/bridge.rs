//! Engine hooks that forward to the context's loader.
//!
//! [`LoaderBridge`] is installed as the engine's [`HostHooks`]. It never
//! blocks: a dynamic import either returns the loader's future unchanged or
//! an already-rejected one.

use tracing::{debug, warn};

use esm_linker_common::ModuleError;
use esm_linker_core::{
    ContextId, Environment, HostDefinedOptions, HostHooks, ImportFuture, ModuleRecord,
    ScriptEngine, ScriptType, WeakEnvironment, rejected_import,
};

/// Host hooks backed by per-context loaders.
///
/// Holds the environment weakly so the engine's reference to the hooks does
/// not keep the environment alive.
pub struct LoaderBridge<E: ScriptEngine> {
    env: WeakEnvironment<E>,
}

impl<E: ScriptEngine> LoaderBridge<E> {
    /// Create a bridge for `env`.
    pub fn new(env: WeakEnvironment<E>) -> Self {
        Self { env }
    }

    fn start_import(
        &self,
        context: ContextId,
        referrer: Option<&HostDefinedOptions>,
        specifier: &str,
    ) -> Result<ImportFuture<E::Value>, ModuleError> {
        let referrer = validate_referrer(referrer)?;

        let loader = self
            .env
            .upgrade()
            .and_then(|env| env.context(context))
            .and_then(|context| context.loader())
            .ok_or_else(|| {
                ModuleError::configuration("A module loader is not associated with this context")
            })?;

        debug!(specifier, referrer = %referrer.url, "Forwarding dynamic import to loader");

        loader
            .import(specifier, &referrer.url)
            .map_err(|fault| ModuleError::internal_fault(fault.reason))
    }

    fn find_record(
        env: &Environment<E>,
        context: ContextId,
        module: &E::Module,
    ) -> Option<ModuleRecord<E>> {
        env.context(context)
            .and_then(|context| context.lookup(module))
            .or_else(|| env.find_module(module))
    }
}

impl<E: ScriptEngine> HostHooks<E> for LoaderBridge<E> {
    fn import_module_dynamically(
        &self,
        context: ContextId,
        referrer: Option<&HostDefinedOptions>,
        specifier: &str,
    ) -> ImportFuture<E::Value> {
        match self.start_import(context, referrer, specifier) {
            Ok(future) => future,
            Err(error) => {
                warn!(specifier, error = %error, "Dynamic import rejected");
                rejected_import(error)
            }
        }
    }

    fn initialize_import_meta(&self, context: ContextId, module: &E::Module, meta: &E::Value) {
        let Some(env) = self.env.upgrade() else {
            return;
        };

        // Modules created outside this environment are left alone
        let Some(record) = Self::find_record(&env, context, module) else {
            debug!(context = %context, "import.meta requested for an unknown module");
            return;
        };

        let Some(loader) = record.context().loader() else {
            debug!(url = %record.url(), "No loader to initialize import.meta");
            return;
        };

        loader.initialize_import_meta(meta, record.url());
    }
}

/// Accept only metadata of a module with a url.
fn validate_referrer(
    referrer: Option<&HostDefinedOptions>,
) -> Result<&HostDefinedOptions, ModuleError> {
    match referrer {
        Some(options) if options.script_type == ScriptType::Module && !options.url.is_empty() => {
            Ok(options)
        }
        _ => Err(ModuleError::configuration("Invalid host defined options")),
    }
}
