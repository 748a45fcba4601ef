//! Execution contexts and the environment that owns them.
//!
//! An [`Environment`] wraps one engine and owns the main [`ModuleContext`].
//! Every context carries its own module registry and its own loader slot, so
//! contexts never share record state. Additional contexts (sandboxes) are
//! created with [`Environment::new_context`] and live as long as a handle or
//! a record compiled in them does.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;
use uuid::Uuid;

use esm_linker_common::{LinkerConfig, ModuleError};

use crate::engine::{HostHooks, ScriptEngine};
use crate::loader::Loader;
use crate::module::{ModuleRecord, RecordInner};
use crate::registry::ModuleRegistry;

/// Unique identifier of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct EnvironmentInner<E: ScriptEngine> {
    engine: Rc<E>,
    config: LinkerConfig,
    main_context: ModuleContext<E>,
    contexts: RefCell<HashMap<ContextId, Weak<ContextInner<E>>>>,
    hooks_installed: Cell<bool>,
}

/// One engine together with the contexts compiled against it.
///
/// Cloning is cheap and yields a handle to the same environment.
///
/// # Example
///
/// ```ignore
/// let env = Environment::new(engine);
/// let record = env.create_module("export const x = 1", "a.mod", CreateOptions::default())?;
/// record.instantiate()?;
/// record.evaluate(EvaluateOptions::new())?;
/// ```
pub struct Environment<E: ScriptEngine> {
    inner: Rc<EnvironmentInner<E>>,
}

impl<E: ScriptEngine> Environment<E> {
    /// Create an environment with the default configuration.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, LinkerConfig::default())
    }

    /// Create an environment with the given configuration.
    pub fn with_config(engine: E, config: LinkerConfig) -> Self {
        let engine = Rc::new(engine);
        let inner = Rc::new_cyclic(|env: &Weak<EnvironmentInner<E>>| {
            let main_context = ModuleContext::create(Rc::clone(&engine), env.clone());
            EnvironmentInner {
                engine,
                config,
                main_context,
                contexts: RefCell::new(HashMap::new()),
                hooks_installed: Cell::new(false),
            }
        });

        let main = &inner.main_context;
        inner
            .contexts
            .borrow_mut()
            .insert(main.id(), Rc::downgrade(&main.inner));

        debug!(main_context = %main.id(), "Environment created");

        Self { inner }
    }

    /// The engine shared by every context.
    pub fn engine(&self) -> &Rc<E> {
        &self.inner.engine
    }

    /// The configuration the environment was created with.
    pub fn config(&self) -> &LinkerConfig {
        &self.inner.config
    }

    /// The context modules compile into unless told otherwise.
    pub fn main_context(&self) -> &ModuleContext<E> {
        &self.inner.main_context
    }

    /// Create an additional context with its own registry and loader slot.
    pub fn new_context(&self) -> ModuleContext<E> {
        let context =
            ModuleContext::create(Rc::clone(&self.inner.engine), Rc::downgrade(&self.inner));
        self.inner
            .contexts
            .borrow_mut()
            .insert(context.id(), Rc::downgrade(&context.inner));

        debug!(context = %context.id(), "Context created");
        context
    }

    /// Find a live context by id.
    pub fn context(&self, id: ContextId) -> Option<ModuleContext<E>> {
        self.inner
            .contexts
            .borrow()
            .get(&id)
            .and_then(Weak::upgrade)
            .map(|inner| ModuleContext { inner })
    }

    /// Number of live contexts, including the main one.
    pub fn context_count(&self) -> usize {
        self.inner
            .contexts
            .borrow()
            .values()
            .filter(|context| context.strong_count() > 0)
            .count()
    }

    /// Compile module source into a new record.
    ///
    /// # Arguments
    ///
    /// * `source` - Module source text
    /// * `url` - Url recorded on the module and reported in diagnostics
    /// * `options` - Target context and position offsets
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The target context belongs to another environment
    /// - The engine rejects the source (`ModuleError::Compile`)
    pub fn create_module(
        &self,
        source: &str,
        url: &str,
        options: CreateOptions<E>,
    ) -> Result<ModuleRecord<E>, ModuleError> {
        let context = options
            .context
            .unwrap_or_else(|| self.inner.main_context.clone());

        if !Weak::ptr_eq(&context.inner.env, &Rc::downgrade(&self.inner)) {
            return Err(ModuleError::configuration(
                "context belongs to a different environment",
            ));
        }

        ModuleRecord::compile(&context, source, url, options.line_offset, options.column_offset)
    }

    /// Find the record wrapping an engine module in any context.
    pub fn find_module(&self, module: &E::Module) -> Option<ModuleRecord<E>> {
        // Upgrade first so no borrow is held while contexts are searched
        let contexts: Vec<_> = self
            .inner
            .contexts
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect();

        contexts
            .into_iter()
            .find_map(|inner| ModuleContext { inner }.lookup(module))
    }

    /// Install host hooks on the engine, once per environment.
    ///
    /// `make_hooks` receives a weak handle so the hooks do not keep the
    /// environment alive. Returns `false` (without calling `make_hooks`) if
    /// hooks were already installed.
    pub fn install_host_hooks(
        &self,
        make_hooks: impl FnOnce(WeakEnvironment<E>) -> Rc<dyn HostHooks<E>>,
    ) -> bool {
        if self.inner.hooks_installed.replace(true) {
            return false;
        }

        self.inner.engine.set_host_hooks(make_hooks(self.downgrade()));
        debug!("Host hooks installed");
        true
    }

    /// Returns `true` once host hooks have been installed.
    pub fn host_hooks_installed(&self) -> bool {
        self.inner.hooks_installed.get()
    }

    /// Create a weak handle.
    pub fn downgrade(&self) -> WeakEnvironment<E> {
        WeakEnvironment {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns `true` if both handles refer to the same environment.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<E: ScriptEngine> Clone for Environment<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: ScriptEngine> fmt::Debug for Environment<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("main_context", &self.inner.main_context.id())
            .field("contexts", &self.context_count())
            .field("hooks_installed", &self.inner.hooks_installed.get())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to an [`Environment`].
pub struct WeakEnvironment<E: ScriptEngine> {
    inner: Weak<EnvironmentInner<E>>,
}

impl<E: ScriptEngine> WeakEnvironment<E> {
    /// The environment, if it is still alive.
    pub fn upgrade(&self) -> Option<Environment<E>> {
        self.inner.upgrade().map(|inner| Environment { inner })
    }
}

impl<E: ScriptEngine> Clone for WeakEnvironment<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: ScriptEngine> fmt::Debug for WeakEnvironment<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEnvironment")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

pub(crate) struct ContextInner<E: ScriptEngine> {
    id: ContextId,
    engine: Rc<E>,
    env: Weak<EnvironmentInner<E>>,
    registry: RefCell<ModuleRegistry<E::Module, RecordInner<E>>>,
    loader: RefCell<Option<Rc<dyn Loader<E>>>>,
}

impl<E: ScriptEngine> Drop for ContextInner<E> {
    fn drop(&mut self) {
        if let Some(env) = self.env.upgrade() {
            if let Ok(mut contexts) = env.contexts.try_borrow_mut() {
                contexts.remove(&self.id);
            }
        }
        debug!(context = %self.id, "Context released");
    }
}

/// An execution context: the scope of one module registry and one loader.
///
/// Cloning is cheap and yields a handle to the same context.
pub struct ModuleContext<E: ScriptEngine> {
    pub(crate) inner: Rc<ContextInner<E>>,
}

impl<E: ScriptEngine> ModuleContext<E> {
    fn create(engine: Rc<E>, env: Weak<EnvironmentInner<E>>) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                id: ContextId::new(),
                engine,
                env,
                registry: RefCell::new(ModuleRegistry::new()),
                loader: RefCell::new(None),
            }),
        }
    }

    /// The context id passed to the engine.
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// The engine this context compiles with.
    pub fn engine(&self) -> &Rc<E> {
        &self.inner.engine
    }

    /// The owning environment, if it is still alive.
    pub fn environment(&self) -> Option<Environment<E>> {
        self.inner.env.upgrade().map(|inner| Environment { inner })
    }

    /// Find the live record wrapping `module` in this context.
    pub fn lookup(&self, module: &E::Module) -> Option<ModuleRecord<E>> {
        let engine = &self.inner.engine;
        let hash = engine.identity_hash(module);
        self.inner
            .registry
            .borrow()
            .lookup(hash, module, |a, b| engine.same_module(a, b))
            .map(ModuleRecord::from_inner)
    }

    /// Number of live records registered in this context.
    pub fn module_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    /// Associate a loader with this context.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::Configuration` if a loader is already associated.
    pub fn set_loader(&self, loader: Rc<dyn Loader<E>>) -> Result<(), ModuleError> {
        let mut slot = self.inner.loader.borrow_mut();
        if slot.is_some() {
            return Err(ModuleError::configuration("already has a loader"));
        }
        *slot = Some(loader);

        debug!(context = %self.inner.id, "Loader associated with context");
        Ok(())
    }

    /// Associate a loader, replacing any previous one.
    pub fn replace_loader(&self, loader: Rc<dyn Loader<E>>) -> Option<Rc<dyn Loader<E>>> {
        self.inner.loader.borrow_mut().replace(loader)
    }

    /// The loader associated with this context.
    pub fn loader(&self) -> Option<Rc<dyn Loader<E>>> {
        self.inner.loader.borrow().clone()
    }

    /// Returns `true` if both handles refer to the same context.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns `true` if both contexts belong to the same environment.
    pub(crate) fn same_environment(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.inner.env, &other.inner.env)
    }

    pub(crate) fn register(&self, hash: u32, module: E::Module, record: Weak<RecordInner<E>>) {
        self.inner.registry.borrow_mut().register(hash, module, record);
    }

    /// Remove the entry for `module`; a busy registry keeps the dead entry
    /// until the next insertion prunes it.
    pub(crate) fn unregister(&self, hash: u32, module: &E::Module) -> bool {
        let engine = &self.inner.engine;
        match self.inner.registry.try_borrow_mut() {
            Ok(mut registry) => registry.unregister(hash, module, |a, b| engine.same_module(a, b)),
            Err(_) => false,
        }
    }
}

impl<E: ScriptEngine> Clone for ModuleContext<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: ScriptEngine> fmt::Debug for ModuleContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("id", &self.inner.id)
            .field("modules", &self.module_count())
            .field("has_loader", &self.inner.loader.borrow().is_some())
            .finish()
    }
}

/// Options for [`Environment::create_module`].
pub struct CreateOptions<E: ScriptEngine> {
    /// Context to compile in; the main context if `None`.
    pub context: Option<ModuleContext<E>>,
    /// Added to every reported line number.
    pub line_offset: u32,
    /// Added to reported columns on the first line.
    pub column_offset: u32,
}

impl<E: ScriptEngine> CreateOptions<E> {
    /// Compile into `context`.
    #[must_use]
    pub fn in_context(mut self, context: &ModuleContext<E>) -> Self {
        self.context = Some(context.clone());
        self
    }

    /// Set the line and column offsets.
    #[must_use]
    pub fn with_offsets(mut self, line_offset: u32, column_offset: u32) -> Self {
        self.line_offset = line_offset;
        self.column_offset = column_offset;
        self
    }
}

impl<E: ScriptEngine> Default for CreateOptions<E> {
    fn default() -> Self {
        Self {
            context: None,
            line_offset: 0,
            column_offset: 0,
        }
    }
}

impl<E: ScriptEngine> fmt::Debug for CreateOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateOptions")
            .field("context", &self.context.as_ref().map(ModuleContext::id))
            .field("line_offset", &self.line_offset)
            .field("column_offset", &self.column_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_are_unique() {
        let a = ContextId::new();
        let b = ContextId::new();

        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }
}
