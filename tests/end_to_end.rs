//! End-to-end tests through the facade crate.
//!
//! A small in-memory "file system" loader drives static linking, dynamic
//! `import()` and `import.meta` the way an embedder would.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::info;

use esm_linker::linker::{ImportFuture, ImportRejection, TerminationControl, WeakEnvironment};
use esm_linker::telemetry::{self, DEFAULT_FILTER};
use esm_linker::{
    CreateOptions, Environment, Loader, LoaderFault, LinkerConfig, ModuleError, ModuleRecord,
    run_module, set_default_loader,
};
use esm_linker_testkit::{TestEngine, TestValue};

type Record = ModuleRecord<TestEngine>;

fn init_tracing() {
    telemetry::init_tracing(DEFAULT_FILTER);
}

/// Sources keyed by url; specifiers are urls.
#[derive(Clone)]
struct Files(Rc<HashMap<&'static str, &'static str>>);

impl Files {
    fn new(files: &[(&'static str, &'static str)]) -> Self {
        Self(Rc::new(files.iter().copied().collect()))
    }

    /// Compile `url` and everything it imports, then run it.
    fn run(&self, env: &Environment<TestEngine>, url: &str) -> Result<TestValue, ModuleError> {
        let root = self.compile(env, url)?;
        let mut compiled: HashMap<String, Record> = HashMap::new();
        compiled.insert(url.to_string(), root.clone());

        let mut resolver = |specifier: &str, _referrer: &Record| -> Result<Record, ModuleError> {
            if let Some(record) = compiled.get(specifier) {
                return Ok(record.clone());
            }
            let record = self.compile(env, specifier)?;
            compiled.insert(specifier.to_string(), record.clone());
            Ok(record)
        };
        run_module(&root, &mut resolver)
    }

    fn compile(&self, env: &Environment<TestEngine>, url: &str) -> Result<Record, ModuleError> {
        let source = self
            .0
            .get(url)
            .ok_or_else(|| ModuleError::configuration(format!("Cannot find module '{url}'")))?;
        env.create_module(source, url, CreateOptions::default())
    }
}

struct FileLoader {
    env: WeakEnvironment<TestEngine>,
    files: Files,
}

impl Loader<TestEngine> for FileLoader {
    fn import(
        &self,
        specifier: &str,
        referrer_url: &str,
    ) -> Result<ImportFuture<TestValue>, LoaderFault> {
        let env = self
            .env
            .upgrade()
            .ok_or_else(|| LoaderFault::new("environment is gone"))?;
        let files = self.files.clone();
        let specifier = specifier.to_string();
        info!(%specifier, referrer = referrer_url, "Loading dynamically");

        Ok(Box::pin(async move {
            files
                .run(&env, &specifier)
                .map_err(|error| ImportRejection::Thrown(TestValue::string(error.to_string())))
        }))
    }

    fn initialize_import_meta(&self, meta: &TestValue, url: &str) {
        meta.set("url", TestValue::string(url));
    }
}

fn environment_with_loader(config: LinkerConfig, files: &Files) -> Environment<TestEngine> {
    let env = Environment::with_config(TestEngine::new(), config);
    let loader = FileLoader {
        env: env.downgrade(),
        files: files.clone(),
    };
    set_default_loader(&env, Rc::new(loader));
    env
}

// ============================================================================
// Test: Static and Dynamic Graphs
// ============================================================================

#[tokio::test]
async fn test_static_graph_with_dynamic_import() {
    init_tracing();
    let files = Files::new(&[
        (
            "file:///app/main.mjs",
            "import {greeting} from \"file:///app/greet.mjs\"\nexport const message = greeting\nexport const url = import.meta.url\nimport(\"file:///app/lazy.mjs\")",
        ),
        ("file:///app/greet.mjs", "export const greeting = \"hello\""),
        ("file:///app/lazy.mjs", "export default \"lazy loaded\""),
    ]);
    let env = environment_with_loader(LinkerConfig::default(), &files);

    let namespace = files.run(&env, "file:///app/main.mjs").unwrap();
    assert_eq!(namespace.get("message"), TestValue::string("hello"));
    assert_eq!(namespace.get("url"), TestValue::string("file:///app/main.mjs"));

    let mut imports = env.engine().take_dynamic_imports();
    assert_eq!(imports.len(), 1);
    let lazy = imports.remove(0).future.await.unwrap();

    assert_eq!(lazy.get("default"), TestValue::string("lazy loaded"));
}

#[tokio::test]
async fn test_dynamic_import_of_missing_module_rejects() {
    init_tracing();
    let files = Files::new(&[("file:///app/main.mjs", "import(\"file:///app/nope.mjs\")")]);
    let env = environment_with_loader(LinkerConfig::default(), &files);

    files.run(&env, "file:///app/main.mjs").unwrap();
    let import = env.engine().take_dynamic_imports().remove(0);

    let rejection = import.future.await.unwrap_err();
    assert_eq!(
        rejection,
        ImportRejection::Thrown(TestValue::string(
            "Cannot find module 'file:///app/nope.mjs'"
        ))
    );
}

// ============================================================================
// Test: Configuration
// ============================================================================

#[test]
fn test_configured_timeout_from_toml() {
    init_tracing();
    let config = LinkerConfig::from_toml("[execution]\ntimeout_ms = 50\n").unwrap();
    let files = Files::new(&[("file:///app/spin.mjs", "while (true) {}")]);
    let env = environment_with_loader(config, &files);

    let err = files.run(&env, "file:///app/spin.mjs").unwrap_err();

    assert_eq!(err, ModuleError::ExecutionTimeout { timeout_ms: 50 });
    assert!(!env.engine().termination().is_execution_terminating());
}

#[test]
fn test_compile_error_is_decorated() {
    init_tracing();
    let files = Files::new(&[("file:///app/bad.mjs", "export const = 1")]);
    let env = environment_with_loader(LinkerConfig::default(), &files);

    let err = files.run(&env, "file:///app/bad.mjs").unwrap_err();

    assert_eq!(
        err.decorated(),
        "file:///app/bad.mjs:1\nexport const = 1\n^^^^^^^^^^^^^^^^\n\nSyntaxError: Invalid or unexpected token"
    );
}

#[test]
fn test_tracing_installs_once() {
    init_tracing();
    assert!(!telemetry::init_tracing(DEFAULT_FILTER));
    assert!(!telemetry::init_json_tracing(DEFAULT_FILTER));
}
