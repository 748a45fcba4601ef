//! The embedder-supplied loader capability.
//!
//! A [`Loader`] owns the specifier resolution policy: it turns an `import()`
//! request into a module namespace and decorates `import.meta` objects. The
//! linker never implements that policy; it only forwards to the loader
//! associated with the requesting module's context.

use thiserror::Error;

use crate::engine::{ImportFuture, ScriptEngine};

/// Loader invocation failed before producing a future.
///
/// This is not a rejection by the loader's own logic; those travel through
/// the returned future.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct LoaderFault {
    /// Description of the fault.
    pub reason: String,
}

impl LoaderFault {
    /// Create a new fault.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Specifier resolution policy for one context.
pub trait Loader<E: ScriptEngine> {
    /// Start loading `specifier` on behalf of the module at `referrer_url`.
    ///
    /// The future resolves to the namespace of the loaded module.
    ///
    /// # Errors
    ///
    /// Returns a [`LoaderFault`] if the request could not even be started.
    fn import(
        &self,
        specifier: &str,
        referrer_url: &str,
    ) -> Result<ImportFuture<E::Value>, LoaderFault>;

    /// Populate the `import.meta` object of the module at `url`.
    fn initialize_import_meta(&self, meta: &E::Value, url: &str);
}
