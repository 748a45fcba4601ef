//! Module records.
//!
//! This module provides [`ModuleRecord`], the wrapper around one compiled
//! engine module. A record owns:
//!
//! - the url the module was compiled from
//! - its owning [`ModuleContext`]
//! - the one-shot `linked` flag
//! - the [`ResolveCache`] filled by [`ModuleRecord::resolve_dependency`]
//!
//! Status, namespace and exception are never stored here; they are always
//! read from the engine. Linking lives in [`crate::linker`] and evaluation in
//! [`crate::evaluator`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use esm_linker_common::{LinkError, ModuleError};

use crate::cache::ResolveCache;
use crate::context::ModuleContext;
use crate::engine::{ModuleStatus, ScriptEngine, ScriptOrigin};

pub(crate) struct RecordInner<E: ScriptEngine> {
    pub(crate) module: E::Module,
    pub(crate) identity_hash: u32,
    pub(crate) url: String,
    pub(crate) context: ModuleContext<E>,
    pub(crate) linked: Cell<bool>,
    pub(crate) resolve_cache: RefCell<ResolveCache<ModuleRecord<E>>>,
}

impl<E: ScriptEngine> Drop for RecordInner<E> {
    fn drop(&mut self) {
        self.context.unregister(self.identity_hash, &self.module);
        debug!(url = %self.url, "Module record released");
    }
}

/// A compiled module and its linking state.
///
/// Cloning is cheap and yields a handle to the same record. The record is
/// unregistered when the last handle is dropped.
///
/// # Thread Safety
///
/// Records belong to the thread that owns their environment and are neither
/// `Send` nor `Sync`.
pub struct ModuleRecord<E: ScriptEngine> {
    pub(crate) inner: Rc<RecordInner<E>>,
}

impl<E: ScriptEngine> ModuleRecord<E> {
    pub(crate) fn from_inner(inner: Rc<RecordInner<E>>) -> Self {
        Self { inner }
    }

    /// Compile `source` in `context` and register the new record.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::Compile` if the engine rejects the source. Nothing
    /// is registered in that case.
    #[instrument(skip(context, source), fields(context = %context.id(), source_len = source.len()))]
    pub(crate) fn compile(
        context: &ModuleContext<E>,
        source: &str,
        url: &str,
        line_offset: u32,
        column_offset: u32,
    ) -> Result<Self, ModuleError> {
        let start = Instant::now();
        let engine = context.engine();

        let origin = ScriptOrigin::module(url, line_offset, column_offset);
        let module = engine.compile(context.id(), source, origin).map_err(|exception| {
            warn!(message = %exception.message, "Module compilation failed");
            ModuleError::compile(exception.message, exception.location)
        })?;

        let identity_hash = engine.identity_hash(&module);
        let resolve_cache = ResolveCache::seeded(engine.requested_specifiers(&module));
        let dependencies = resolve_cache.len();

        let inner = Rc::new(RecordInner {
            module: module.clone(),
            identity_hash,
            url: url.to_string(),
            context: context.clone(),
            linked: Cell::new(false),
            resolve_cache: RefCell::new(resolve_cache),
        });
        context.register(identity_hash, module, Rc::downgrade(&inner));

        info!(
            identity_hash,
            dependencies,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self { inner })
    }

    /// Bind `specifier` to `target` for the upcoming instantiation.
    ///
    /// Calling again for the same specifier replaces the previous target.
    ///
    /// # Arguments
    ///
    /// * `specifier` - One of the specifiers this module requests
    /// * `target` - The record the specifier resolves to
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The record is already linked (`LinkError::AlreadyLinked`)
    /// - The module never requested `specifier` (`LinkError::UnknownSpecifier`)
    /// - `target` is not a registered record of this environment
    ///   (`LinkError::InvalidTarget`)
    pub fn resolve_dependency(&self, specifier: &str, target: &Self) -> Result<(), LinkError> {
        if self.inner.linked.get() {
            return Err(LinkError::AlreadyLinked);
        }

        if !self.inner.resolve_cache.borrow().contains(specifier) {
            return Err(LinkError::UnknownSpecifier {
                specifier: specifier.to_string(),
            });
        }

        if !self.inner.context.same_environment(&target.inner.context) || !target.is_registered() {
            return Err(LinkError::InvalidTarget);
        }

        // The replaced target is dropped after the borrow ends
        let replaced = self
            .inner
            .resolve_cache
            .borrow_mut()
            .resolve(specifier, target.clone());

        debug!(
            url = %self.inner.url,
            specifier,
            target = %target.inner.url,
            replaced = matches!(replaced, Ok(Some(_))),
            "Dependency resolved"
        );
        Ok(())
    }

    /// Url the module was compiled from.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// The context the module was compiled in.
    pub fn context(&self) -> &ModuleContext<E> {
        &self.inner.context
    }

    /// The engine module handle.
    pub fn engine_module(&self) -> &E::Module {
        &self.inner.module
    }

    /// The engine's (non-unique) identity hash for the module.
    pub fn identity_hash(&self) -> u32 {
        self.inner.identity_hash
    }

    /// Returns `true` once instantiation has been attempted.
    pub fn is_linked(&self) -> bool {
        self.inner.linked.get()
    }

    /// Current status, as reported by the engine.
    pub fn status(&self) -> ModuleStatus {
        self.engine().status(&self.inner.module)
    }

    /// The module namespace object.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::NotInstantiated` unless the module is
    /// instantiated, evaluating or evaluated.
    pub fn namespace(&self) -> Result<E::Value, ModuleError> {
        if !self.status().has_namespace() {
            return Err(ModuleError::NotInstantiated);
        }
        Ok(self.engine().namespace(&self.inner.module))
    }

    /// Specifiers the module requests, in source order.
    ///
    /// Read from the engine, so the answer does not change when the resolve
    /// cache is released by instantiation.
    pub fn dependency_specifiers(&self) -> Vec<String> {
        self.engine().requested_specifiers(&self.inner.module)
    }

    /// The exception retained by an errored module.
    pub fn error(&self) -> Option<E::Value> {
        self.engine().exception(&self.inner.module)
    }

    /// Snapshot of the resolve cache: each specifier with the url of the
    /// record it resolves to, if any.
    ///
    /// Empty once the record is linked.
    pub fn resolved_dependencies(&self) -> Vec<(String, Option<String>)> {
        self.inner
            .resolve_cache
            .borrow()
            .iter()
            .map(|(specifier, target)| {
                (
                    specifier.to_string(),
                    target.map(|record| record.url().to_string()),
                )
            })
            .collect()
    }

    /// Returns `true` if both handles refer to the same record.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn engine(&self) -> &E {
        self.inner.context.engine()
    }

    fn is_registered(&self) -> bool {
        self.inner
            .context
            .lookup(&self.inner.module)
            .is_some_and(|found| found.ptr_eq(self))
    }
}

impl<E: ScriptEngine> Clone for ModuleRecord<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: ScriptEngine> fmt::Debug for ModuleRecord<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("url", &self.inner.url)
            .field("identity_hash", &self.inner.identity_hash)
            .field("context", &self.inner.context.id())
            .field("linked", &self.inner.linked.get())
            .finish_non_exhaustive()
    }
}
