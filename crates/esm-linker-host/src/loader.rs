//! Loader registration.
//!
//! Associates [`Loader`]s with contexts and installs the [`LoaderBridge`] on
//! the engine the first time a loader is registered.

use std::rc::Rc;

use tracing::{debug, info};

use esm_linker_common::ModuleError;
use esm_linker_core::{
    Environment, HostHooks, ImportFuture, Loader, LoaderFault, ModuleContext, ScriptEngine,
};

use crate::bridge::LoaderBridge;

/// Make `loader` the loader of the environment's main context.
///
/// Replaces any loader previously set there. The first call on an
/// environment installs the dynamic-import and import-meta bridges as the
/// engine's host hooks.
pub fn set_default_loader<E: ScriptEngine>(env: &Environment<E>, loader: Rc<dyn Loader<E>>) {
    let context = env.main_context();
    if context.replace_loader(loader).is_some() {
        debug!(context = %context.id(), "Default loader replaced");
    }
    install_bridge(env);
}

/// Associate `loader` with `context`.
///
/// # Errors
///
/// Returns `ModuleError::Configuration` if:
/// - `context` already has a loader
/// - `context` belongs to a different environment
pub fn set_loader_for_context<E: ScriptEngine>(
    env: &Environment<E>,
    context: &ModuleContext<E>,
    loader: Rc<dyn Loader<E>>,
) -> Result<(), ModuleError> {
    let owned = env
        .context(context.id())
        .is_some_and(|found| found.ptr_eq(context));
    if !owned {
        return Err(ModuleError::configuration(
            "context belongs to a different environment",
        ));
    }

    context.set_loader(loader)?;
    install_bridge(env);
    Ok(())
}

fn install_bridge<E: ScriptEngine>(env: &Environment<E>) {
    let installed = env.install_host_hooks(|weak| -> Rc<dyn HostHooks<E>> {
        Rc::new(LoaderBridge::new(weak))
    });
    if installed {
        info!("Loader bridges installed as engine host hooks");
    }
}

/// A [`Loader`] built from two closures.
///
/// # Example
///
/// ```ignore
/// let loader = FnLoader::new(
///     |specifier, referrer| Ok(load(specifier, referrer)),
///     |meta, url| set_url(meta, url),
/// );
/// set_default_loader(&env, Rc::new(loader));
/// ```
pub struct FnLoader<I, M> {
    import: I,
    initialize_import_meta: M,
}

impl<I, M> FnLoader<I, M> {
    /// Create a loader from an import closure and an import-meta closure.
    ///
    /// `V` is the engine's value type.
    pub fn new<V>(import: I, initialize_import_meta: M) -> Self
    where
        I: Fn(&str, &str) -> Result<ImportFuture<V>, LoaderFault>,
        M: Fn(&V, &str),
    {
        Self {
            import,
            initialize_import_meta,
        }
    }
}

impl<E, I, M> Loader<E> for FnLoader<I, M>
where
    E: ScriptEngine,
    I: Fn(&str, &str) -> Result<ImportFuture<E::Value>, LoaderFault>,
    M: Fn(&E::Value, &str),
{
    fn import(
        &self,
        specifier: &str,
        referrer_url: &str,
    ) -> Result<ImportFuture<E::Value>, LoaderFault> {
        (self.import)(specifier, referrer_url)
    }

    fn initialize_import_meta(&self, meta: &E::Value, url: &str) {
        (self.initialize_import_meta)(meta, url);
    }
}
