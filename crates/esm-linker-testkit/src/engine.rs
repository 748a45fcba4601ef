//! The scripted engine.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

use esm_linker_common::{ModuleError, SourceLocation};
use esm_linker_core::{
    ContextId, Exception, HostDefinedOptions, HostHooks, ImportFuture, ImportRejection,
    ModuleStatus, ScriptEngine, ScriptOrigin, TerminationControl, rejected_import,
};

use crate::parser::{Expr, ImportBinding, Stmt, StmtKind, parse_module};
use crate::value::TestValue;

const DEFAULT_EXPORT: &str = "default";
const DEFAULT_BINDING: &str = "*default*";

/// Termination flag shared with watchdog threads.
#[derive(Debug, Default)]
pub struct TestTermination {
    terminating: AtomicBool,
    requests: AtomicUsize,
    cancellations: AtomicUsize,
}

impl TestTermination {
    /// How many times termination was requested.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// How many times termination was cancelled.
    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

impl TerminationControl for TestTermination {
    fn terminate_execution(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.terminating.store(true, Ordering::SeqCst);
    }

    fn cancel_terminate_execution(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        self.terminating.store(false, Ordering::SeqCst);
    }

    fn is_execution_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }
}

struct ModuleData {
    id: u64,
    context: ContextId,
    host_defined: HostDefinedOptions,
    statements: Vec<Stmt>,
    specifiers: Vec<String>,
    status: Cell<ModuleStatus>,
    exception: RefCell<Option<TestValue>>,
    linked: RefCell<HashMap<String, TestModule>>,
    bindings: RefCell<BTreeMap<String, TestValue>>,
    meta: RefCell<Option<TestValue>>,
}

/// Handle to a module compiled by [`TestEngine`]; compared by identity.
#[derive(Clone)]
pub struct TestModule(Rc<ModuleData>);

impl TestModule {
    /// Url the module was compiled from.
    pub fn url(&self) -> &str {
        &self.0.host_defined.url
    }

    /// Context the module was compiled in.
    pub fn context(&self) -> ContextId {
        self.0.context
    }

    fn status(&self) -> ModuleStatus {
        self.0.status.get()
    }

    fn set_status(&self, status: ModuleStatus) {
        trace!(url = %self.url(), %status, "Module status changed");
        self.0.status.set(status);
    }

    fn dependency(&self, specifier: &str) -> Option<TestModule> {
        self.0.linked.borrow().get(specifier).cloned()
    }

    fn fail(&self, exception: &Exception<TestValue>) {
        *self.0.exception.borrow_mut() = Some(exception.value.clone());
        self.set_status(ModuleStatus::Errored);
    }
}

impl fmt::Debug for TestModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestModule")
            .field("id", &self.0.id)
            .field("url", &self.url())
            .field("status", &self.status())
            .finish()
    }
}

/// A dynamic `import()` observed during evaluation.
pub struct DynamicImport {
    /// Context of the importing module.
    pub context: ContextId,
    /// Url of the importing module.
    pub referrer: String,
    /// The requested specifier.
    pub specifier: String,
    /// The future the host hook returned.
    pub future: ImportFuture<TestValue>,
}

impl DynamicImport {
    /// Drive the import future to completion on the current thread.
    pub fn block_on(self) -> Result<TestValue, ImportRejection<TestValue>> {
        futures::executor::block_on(self.future)
    }
}

impl fmt::Debug for DynamicImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicImport")
            .field("context", &self.context)
            .field("referrer", &self.referrer)
            .field("specifier", &self.specifier)
            .finish_non_exhaustive()
    }
}

/// Deterministic in-process engine implementing [`ScriptEngine`].
///
/// Modules are written in a line-oriented toy language (see the crate docs).
/// The engine follows the module state machine, walks the graph through the
/// host resolver, evaluates dependencies first, honours forced termination at
/// every statement and inside `while (true) {}`, and calls the host hooks for
/// `import()` and `import.meta`.
pub struct TestEngine {
    next_id: Cell<u64>,
    hash_mask: u32,
    termination: Arc<TestTermination>,
    hooks: RefCell<Option<Rc<dyn HostHooks<TestEngine>>>>,
    hook_installations: Cell<usize>,
    dynamic_imports: RefCell<Vec<DynamicImport>>,
}

impl TestEngine {
    /// Create an engine with well-spread identity hashes.
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            hash_mask: u32::MAX,
            termination: Arc::new(TestTermination::default()),
            hooks: RefCell::new(None),
            hook_installations: Cell::new(0),
            dynamic_imports: RefCell::new(Vec::new()),
        }
    }

    /// Mask every identity hash with `mask`; `0` makes all modules collide.
    #[must_use]
    pub fn with_identity_hash_mask(mut self, mask: u32) -> Self {
        self.hash_mask = mask;
        self
    }

    /// The termination flag, with request and cancellation counters.
    pub fn termination(&self) -> &Arc<TestTermination> {
        &self.termination
    }

    /// How many times host hooks were installed.
    pub fn hook_installations(&self) -> usize {
        self.hook_installations.get()
    }

    /// Returns `true` once host hooks are installed.
    pub fn has_host_hooks(&self) -> bool {
        self.hooks.borrow().is_some()
    }

    /// Drain the dynamic imports triggered so far.
    pub fn take_dynamic_imports(&self) -> Vec<DynamicImport> {
        std::mem::take(&mut *self.dynamic_imports.borrow_mut())
    }

    /// Call the dynamic import hook as the engine would for code carrying
    /// `referrer` metadata.
    pub fn import_dynamically(
        &self,
        context: ContextId,
        referrer: Option<&HostDefinedOptions>,
        specifier: &str,
    ) -> ImportFuture<TestValue> {
        let hooks = self.hooks.borrow().clone();
        match hooks {
            Some(hooks) => hooks.import_module_dynamically(context, referrer, specifier),
            None => rejected_import(ModuleError::configuration(
                "dynamic import callback is not registered",
            )),
        }
    }

    fn terminated(&self) -> Exception<TestValue> {
        Exception {
            value: TestValue::string("Script execution terminated"),
            message: "Error: Script execution terminated".to_string(),
            location: None,
        }
    }

    fn checkpoint(&self) -> Result<(), Exception<TestValue>> {
        if self.termination.is_execution_terminating() {
            return Err(self.terminated());
        }
        Ok(())
    }

    /// Link `module` and everything reachable from it that is still
    /// uninstantiated, recording the visited modules.
    fn link(
        &self,
        module: &TestModule,
        resolve: &mut dyn FnMut(&TestModule, &str) -> Option<TestModule>,
        visited: &mut Vec<TestModule>,
    ) -> Result<(), Exception<TestValue>> {
        if module.status() != ModuleStatus::Uninstantiated {
            return Ok(());
        }
        module.set_status(ModuleStatus::Instantiating);
        visited.push(module.clone());

        for specifier in &module.0.specifiers {
            let Some(dependency) = resolve(module, specifier) else {
                return Err(error_exception(
                    format!("Error: Cannot resolve '{specifier}' from '{}'", module.url()),
                    None,
                ));
            };

            if dependency.status() == ModuleStatus::Errored {
                let value = dependency.0.exception.borrow().clone().unwrap_or_default();
                return Err(Exception {
                    message: format!("Uncaught {value}"),
                    value,
                    location: None,
                });
            }

            module
                .0
                .linked
                .borrow_mut()
                .insert(specifier.clone(), dependency.clone());
            self.link(&dependency, resolve, visited)?;
        }

        Ok(())
    }

    /// Check every named import and re-export against the dependency's
    /// export names.
    fn validate_imports(&self, module: &TestModule) -> Result<(), Exception<TestValue>> {
        for stmt in &module.0.statements {
            let (specifier, names): (&String, Vec<&str>) = match &stmt.kind {
                StmtKind::Import {
                    specifier,
                    bindings,
                } => (
                    specifier,
                    bindings
                        .iter()
                        .filter_map(|binding| match binding {
                            ImportBinding::Named { imported, .. } => Some(imported.as_str()),
                            ImportBinding::Default(_) => Some(DEFAULT_EXPORT),
                            ImportBinding::Namespace(_) => None,
                        })
                        .collect(),
                ),
                StmtKind::ExportFrom { specifier, names } => (
                    specifier,
                    names.iter().map(|(imported, _)| imported.as_str()).collect(),
                ),
                _ => continue,
            };

            let Some(dependency) = module.dependency(specifier) else {
                continue;
            };
            let exported = export_names(&dependency, &mut HashSet::new());
            if let Some(missing) = names.into_iter().find(|name| !exported.contains(*name)) {
                return Err(error_exception(
                    format!(
                        "SyntaxError: The requested module '{specifier}' does not provide an export named '{missing}'"
                    ),
                    Some(stmt.location.clone()),
                ));
            }
        }
        Ok(())
    }

    fn run(&self, module: &TestModule) -> Result<TestValue, Exception<TestValue>> {
        match module.status() {
            ModuleStatus::Evaluated | ModuleStatus::Evaluating => return Ok(TestValue::Undefined),
            ModuleStatus::Errored => {
                let value = module.0.exception.borrow().clone().unwrap_or_default();
                return Err(Exception {
                    message: format!("Uncaught {value}"),
                    value,
                    location: None,
                });
            }
            ModuleStatus::Uninstantiated | ModuleStatus::Instantiating => {
                return Err(error_exception(
                    "Error: Module status must be instantiated before evaluation",
                    None,
                ));
            }
            ModuleStatus::Instantiated => {}
        }

        module.set_status(ModuleStatus::Evaluating);
        match self.run_body(module) {
            Ok(value) => {
                module.set_status(ModuleStatus::Evaluated);
                Ok(value)
            }
            Err(exception) => {
                module.fail(&exception);
                Err(exception)
            }
        }
    }

    fn run_body(&self, module: &TestModule) -> Result<TestValue, Exception<TestValue>> {
        for specifier in &module.0.specifiers {
            if let Some(dependency) = module.dependency(specifier) {
                self.run(&dependency)?;
            }
        }

        let mut completion = TestValue::Undefined;
        for stmt in &module.0.statements {
            self.checkpoint()?;

            match &stmt.kind {
                StmtKind::Import {
                    specifier,
                    bindings,
                } => {
                    let Some(dependency) = module.dependency(specifier) else {
                        continue;
                    };
                    let namespace = namespace_of(&dependency, &mut HashSet::new());
                    let mut scope = module.0.bindings.borrow_mut();
                    for binding in bindings {
                        let (local, value) = match binding {
                            ImportBinding::Named { imported, local } => {
                                (local, namespace.get(imported).cloned().unwrap_or_default())
                            }
                            ImportBinding::Default(local) => (
                                local,
                                namespace.get(DEFAULT_EXPORT).cloned().unwrap_or_default(),
                            ),
                            ImportBinding::Namespace(local) => {
                                (local, TestValue::object_from(namespace.clone()))
                            }
                        };
                        scope.insert(local.clone(), value);
                    }
                }
                StmtKind::ExportConst { name, expr } | StmtKind::Const { name, expr } => {
                    let value = self.eval(module, stmt, expr)?;
                    module.0.bindings.borrow_mut().insert(name.clone(), value);
                }
                StmtKind::ExportDefault(expr) => {
                    let value = self.eval(module, stmt, expr)?;
                    module
                        .0
                        .bindings
                        .borrow_mut()
                        .insert(DEFAULT_BINDING.to_string(), value);
                }
                StmtKind::ExportFrom { .. } | StmtKind::ExportStar { .. } => {}
                StmtKind::Throw(expr) => {
                    let value = self.eval(module, stmt, expr)?;
                    return Err(Exception {
                        message: format!("Uncaught {value}"),
                        value,
                        location: Some(stmt.location.clone()),
                    });
                }
                StmtKind::Loop => loop {
                    self.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(1));
                },
                StmtKind::Expr(expr) => {
                    completion = self.eval(module, stmt, expr)?;
                }
            }
        }

        Ok(completion)
    }

    fn eval(
        &self,
        module: &TestModule,
        stmt: &Stmt,
        expr: &Expr,
    ) -> Result<TestValue, Exception<TestValue>> {
        let lookup = |name: &str| {
            module.0.bindings.borrow().get(name).cloned().ok_or_else(|| {
                let message = format!("ReferenceError: {name} is not defined");
                Exception {
                    value: TestValue::string(message.clone()),
                    message: format!("Uncaught {message}"),
                    location: Some(stmt.location.clone()),
                }
            })
        };

        Ok(match expr {
            Expr::Number(n) => TestValue::Number(*n),
            Expr::Str(s) => TestValue::string(s.clone()),
            Expr::Ident(name) => lookup(name)?,
            Expr::Member(object, prop) => lookup(object)?.get(prop),
            Expr::ImportMeta => self.import_meta(module),
            Expr::ImportMetaProp(prop) => self.import_meta(module).get(prop),
            Expr::DynamicImport(specifier) => {
                let future = self.import_dynamically(
                    module.0.context,
                    Some(&module.0.host_defined),
                    specifier,
                );
                self.dynamic_imports.borrow_mut().push(DynamicImport {
                    context: module.0.context,
                    referrer: module.url().to_string(),
                    specifier: specifier.clone(),
                    future,
                });
                TestValue::Undefined
            }
        })
    }

    fn import_meta(&self, module: &TestModule) -> TestValue {
        let existing = module.0.meta.borrow().clone();
        if let Some(meta) = existing {
            return meta;
        }

        let meta = TestValue::object();
        *module.0.meta.borrow_mut() = Some(meta.clone());

        let hooks = self.hooks.borrow().clone();
        if let Some(hooks) = hooks {
            hooks.initialize_import_meta(module.0.context, module, &meta);
        }
        meta
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestEngine")
            .field("modules_compiled", &(self.next_id.get() - 1))
            .field("hash_mask", &self.hash_mask)
            .field("has_host_hooks", &self.has_host_hooks())
            .finish_non_exhaustive()
    }
}

impl ScriptEngine for TestEngine {
    type Module = TestModule;
    type Value = TestValue;

    fn compile(
        &self,
        context: ContextId,
        source: &str,
        origin: ScriptOrigin,
    ) -> Result<TestModule, Exception<TestValue>> {
        let parsed = parse_module(
            source,
            &origin.resource_name,
            origin.line_offset,
            origin.column_offset,
        )
        .map_err(|location| {
            error_exception("SyntaxError: Invalid or unexpected token", Some(location))
        })?;

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        debug!(id, url = %origin.host_defined.url, "Test module compiled");

        Ok(TestModule(Rc::new(ModuleData {
            id,
            context,
            host_defined: origin.host_defined,
            statements: parsed.statements,
            specifiers: parsed.specifiers,
            status: Cell::new(ModuleStatus::Uninstantiated),
            exception: RefCell::new(None),
            linked: RefCell::new(HashMap::new()),
            bindings: RefCell::new(BTreeMap::new()),
            meta: RefCell::new(None),
        })))
    }

    fn identity_hash(&self, module: &TestModule) -> u32 {
        // Truncation is fine: the hash is not required to be unique
        #[allow(clippy::cast_possible_truncation)]
        let id = module.0.id as u32;
        id.wrapping_mul(0x9E37_79B9) & self.hash_mask
    }

    fn same_module(&self, a: &TestModule, b: &TestModule) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    fn requested_specifiers(&self, module: &TestModule) -> Vec<String> {
        module.0.specifiers.clone()
    }

    fn instantiate(
        &self,
        _context: ContextId,
        module: &TestModule,
        resolve: &mut dyn FnMut(&TestModule, &str) -> Option<TestModule>,
    ) -> Result<(), Exception<TestValue>> {
        match module.status() {
            ModuleStatus::Uninstantiated => {}
            ModuleStatus::Errored => {
                let value = module.0.exception.borrow().clone().unwrap_or_default();
                return Err(Exception {
                    message: format!("Uncaught {value}"),
                    value,
                    location: None,
                });
            }
            _ => return Ok(()),
        }

        let mut visited = Vec::new();
        let result = self
            .link(module, resolve, &mut visited)
            .and_then(|()| visited.iter().try_for_each(|m| self.validate_imports(m)));

        match result {
            Ok(()) => {
                for m in &visited {
                    m.set_status(ModuleStatus::Instantiated);
                }
                Ok(())
            }
            Err(exception) => {
                for m in &visited {
                    m.0.linked.borrow_mut().clear();
                    m.set_status(ModuleStatus::Uninstantiated);
                }
                module.fail(&exception);
                Err(exception)
            }
        }
    }

    fn evaluate(
        &self,
        _context: ContextId,
        module: &TestModule,
    ) -> Result<TestValue, Exception<TestValue>> {
        if let Err(exception) = self.checkpoint() {
            module.fail(&exception);
            return Err(exception);
        }
        self.run(module)
    }

    fn status(&self, module: &TestModule) -> ModuleStatus {
        module.status()
    }

    fn namespace(&self, module: &TestModule) -> TestValue {
        TestValue::object_from(namespace_of(module, &mut HashSet::new()))
    }

    fn exception(&self, module: &TestModule) -> Option<TestValue> {
        module.0.exception.borrow().clone()
    }

    fn termination_control(&self) -> Arc<dyn TerminationControl> {
        self.termination.clone()
    }

    fn set_host_hooks(&self, hooks: Rc<dyn HostHooks<Self>>) {
        self.hook_installations.set(self.hook_installations.get() + 1);
        *self.hooks.borrow_mut() = Some(hooks);
    }
}

fn error_exception(
    message: impl Into<String>,
    location: Option<SourceLocation>,
) -> Exception<TestValue> {
    let message = message.into();
    Exception {
        value: TestValue::string(message.clone()),
        message,
        location,
    }
}

/// Names a module exports, following re-exports.
fn export_names(module: &TestModule, seen: &mut HashSet<u64>) -> HashSet<String> {
    namespace_of(module, seen).into_keys().collect()
}

/// Export name to current value, following re-exports.
///
/// `seen` breaks `export *` cycles.
fn namespace_of(module: &TestModule, seen: &mut HashSet<u64>) -> BTreeMap<String, TestValue> {
    let mut namespace = BTreeMap::new();
    if !seen.insert(module.0.id) {
        return namespace;
    }

    let bindings = module.0.bindings.borrow().clone();
    for stmt in &module.0.statements {
        match &stmt.kind {
            StmtKind::ExportConst { name, .. } => {
                namespace.insert(name.clone(), bindings.get(name).cloned().unwrap_or_default());
            }
            StmtKind::ExportDefault(_) => {
                namespace.insert(
                    DEFAULT_EXPORT.to_string(),
                    bindings.get(DEFAULT_BINDING).cloned().unwrap_or_default(),
                );
            }
            StmtKind::ExportFrom { specifier, names } => {
                let Some(dependency) = module.dependency(specifier) else {
                    continue;
                };
                let exported = namespace_of(&dependency, &mut seen.clone());
                for (imported, local) in names {
                    let value = exported.get(imported).cloned().unwrap_or_default();
                    namespace.insert(local.clone(), value);
                }
            }
            StmtKind::ExportStar { specifier } => {
                let Some(dependency) = module.dependency(specifier) else {
                    continue;
                };
                for (name, value) in namespace_of(&dependency, seen) {
                    if name != DEFAULT_EXPORT {
                        namespace.entry(name).or_insert(value);
                    }
                }
            }
            _ => {}
        }
    }

    namespace
}
