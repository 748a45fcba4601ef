//! Graph instantiation.
//!
//! The engine walks the dependency graph itself; the linker only answers its
//! point queries ("which module does `specifier` from this module resolve
//! to?") from the registry and each referrer's resolve cache.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use esm_linker_common::{LinkError, ModuleError};

use crate::context::{Environment, ModuleContext};
use crate::engine::ScriptEngine;
use crate::module::ModuleRecord;

impl<E: ScriptEngine> ModuleRecord<E> {
    /// Instantiate the module graph rooted at this record.
    ///
    /// Linking is one-shot: whatever the outcome, the record is marked linked
    /// and its resolve cache is released, so any later `instantiate` or
    /// `resolve_dependency` fails with `LinkError::AlreadyLinked`.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::Link` if:
    /// - The record is already linked
    /// - The engine asks about a module no context of this environment owns
    ///   (`LinkError::NullReferrer`)
    /// - A requested specifier was never resolved
    ///   (`LinkError::UnresolvedDependency`)
    /// - The engine fails to instantiate the graph
    ///   (`LinkError::Instantiation`)
    #[instrument(skip(self), fields(url = %self.url()))]
    pub fn instantiate(&self) -> Result<(), ModuleError> {
        if self.inner.linked.get() {
            return Err(LinkError::AlreadyLinked.into());
        }

        let start = Instant::now();
        let context = self.context();
        let engine = context.engine();
        let environment = context.environment();

        // First resolver failure; the engine only sees `None`
        let mut failure: Option<LinkError> = None;
        let result = {
            let mut resolve = |referrer: &E::Module, specifier: &str| -> Option<E::Module> {
                match resolve_from_cache(context, environment.as_ref(), referrer, specifier) {
                    Ok(module) => Some(module),
                    Err(error) => {
                        debug!(specifier, error = %error, "Resolver rejected request");
                        failure.get_or_insert(error);
                        None
                    }
                }
            };
            engine.instantiate(context.id(), self.engine_module(), &mut resolve)
        };

        let released = self.inner.resolve_cache.take();
        self.inner.linked.set(true);
        drop(released);

        match (result, failure) {
            (_, Some(error)) => {
                warn!(error = %error, "Module instantiation failed");
                Err(error.into())
            }
            (Err(exception), None) => {
                let error = LinkError::instantiation(exception.message, exception.location);
                warn!(error = %error, "Module instantiation failed");
                Err(error.into())
            }
            (Ok(()), None) => {
                info!(
                    duration_ms = start.elapsed().as_millis(),
                    status = %self.status(),
                    "Module instantiated"
                );
                Ok(())
            }
        }
    }
}

/// Answer one engine resolution query.
///
/// The referrer is looked up in the linking context first, then in every
/// other context of the environment.
fn resolve_from_cache<E: ScriptEngine>(
    context: &ModuleContext<E>,
    environment: Option<&Environment<E>>,
    referrer: &E::Module,
    specifier: &str,
) -> Result<E::Module, LinkError> {
    let record = context
        .lookup(referrer)
        .or_else(|| environment.and_then(|env| env.find_module(referrer)))
        .ok_or_else(|| LinkError::NullReferrer {
            specifier: specifier.to_string(),
        })?;

    let target = record
        .inner
        .resolve_cache
        .borrow()
        .get(specifier)
        .map(|target| target.engine_module().clone());

    target.ok_or_else(|| LinkError::UnresolvedDependency {
        specifier: specifier.to_string(),
        referrer: record.url().to_string(),
    })
}
