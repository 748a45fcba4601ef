//! Integration tests for walking and running module graphs.

use std::collections::HashMap;

use esm_linker_common::{ExecutionConfig, LinkerConfig, ModuleError};
use esm_linker_core::{CreateOptions, EvaluateOptions, Environment, ModuleRecord, ModuleStatus};
use esm_linker_host::{ModuleResolver, link_module_graph, run_module};
use esm_linker_testkit::{TestEngine, TestValue};

type Env = Environment<TestEngine>;
type Record = ModuleRecord<TestEngine>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Resolver over an in-memory source table, compiling each url once.
struct SourceTable {
    env: Env,
    sources: HashMap<&'static str, &'static str>,
    compiled: HashMap<String, Record>,
    requests: Vec<(String, String)>,
}

impl SourceTable {
    fn new(env: &Env, sources: &[(&'static str, &'static str)]) -> Self {
        Self {
            env: env.clone(),
            sources: sources.iter().copied().collect(),
            compiled: HashMap::new(),
            requests: Vec::new(),
        }
    }

    fn load(&mut self, url: &str) -> Result<Record, ModuleError> {
        if let Some(record) = self.compiled.get(url) {
            return Ok(record.clone());
        }

        let source = self
            .sources
            .get(url)
            .ok_or_else(|| ModuleError::configuration(format!("Cannot find module '{url}'")))?;
        let record = self.env.create_module(source, url, CreateOptions::default())?;
        self.compiled.insert(url.to_string(), record.clone());
        Ok(record)
    }
}

impl ModuleResolver<TestEngine> for SourceTable {
    fn resolve(&mut self, specifier: &str, referrer: &Record) -> Result<Record, ModuleError> {
        self.requests
            .push((specifier.to_string(), referrer.url().to_string()));
        self.load(specifier)
    }
}

// ============================================================================
// Test: link_module_graph
// ============================================================================

#[test]
fn test_link_diamond_graph() {
    init_tracing();
    let env = Environment::new(TestEngine::new());
    let mut table = SourceTable::new(
        &env,
        &[
            ("a", "import \"b\"\nimport \"c\""),
            ("b", "import \"d\""),
            ("c", "import \"d\""),
            ("d", "export const d = 1"),
        ],
    );
    let root = table.load("a").unwrap();

    let visited = link_module_graph(&root, &mut table).unwrap();

    let urls: Vec<&str> = visited.iter().map(Record::url).collect();
    assert_eq!(urls.len(), 4);
    assert_eq!(urls[0], "a");
    for url in ["b", "c", "d"] {
        assert!(urls.contains(&url));
    }
    // `d` is requested twice but compiled once
    assert_eq!(table.requests.len(), 4);
    assert_eq!(table.compiled.len(), 4);

    root.instantiate().unwrap();
}

#[test]
fn test_link_skips_linked_records() {
    init_tracing();
    let env = Environment::new(TestEngine::new());
    let mut table = SourceTable::new(
        &env,
        &[
            ("a", "import \"b\""),
            ("b", "import \"c\""),
            ("c", ""),
        ],
    );
    let b = table.load("b").unwrap();
    link_module_graph(&b, &mut table).unwrap();
    b.instantiate().unwrap();
    table.requests.clear();

    let root = table.load("a").unwrap();
    link_module_graph(&root, &mut table).unwrap();

    assert_eq!(table.requests, [("b".to_string(), "a".to_string())]);
    root.instantiate().unwrap();
}

#[test]
fn test_link_cycle_terminates() {
    init_tracing();
    let env = Environment::new(TestEngine::new());
    let mut table = SourceTable::new(
        &env,
        &[
            ("a", "import \"b\"\nexport const a = 1"),
            ("b", "import \"a\"\nexport const b = 2"),
        ],
    );
    let root = table.load("a").unwrap();

    let visited = link_module_graph(&root, &mut table).unwrap();
    assert_eq!(visited.len(), 2);

    root.instantiate().unwrap();
    assert_eq!(table.load("b").unwrap().status(), ModuleStatus::Instantiated);

    root.evaluate(EvaluateOptions::default()).unwrap();
    let namespace = root.namespace().unwrap();
    assert_eq!(namespace.get("a"), TestValue::Number(1.0));
}

#[test]
fn test_link_propagates_resolver_error() {
    init_tracing();
    let env = Environment::new(TestEngine::new());
    let mut table = SourceTable::new(&env, &[("a", "import \"missing\"")]);
    let root = table.load("a").unwrap();

    let err = link_module_graph(&root, &mut table).unwrap_err();

    assert_eq!(
        err,
        ModuleError::configuration("Cannot find module 'missing'")
    );
    assert!(!root.is_linked());
}

#[test]
fn test_link_with_closure_resolver() {
    init_tracing();
    let env = Environment::new(TestEngine::new());
    let root = env
        .create_module(
            "import {x} from \"dep\"\nexport const y = x",
            "root.mod",
            CreateOptions::default(),
        )
        .unwrap();
    let dep = env
        .create_module("export const x = 5", "dep.mod", CreateOptions::default())
        .unwrap();

    let mut resolver = |specifier: &str, _referrer: &Record| -> Result<Record, ModuleError> {
        assert_eq!(specifier, "dep");
        Ok(dep.clone())
    };
    let namespace = run_module(&root, &mut resolver).unwrap();

    assert_eq!(namespace.get("y"), TestValue::Number(5.0));
}

// ============================================================================
// Test: run_module
// ============================================================================

#[test]
fn test_run_module_returns_namespace() {
    init_tracing();
    let env = Environment::new(TestEngine::new());
    let mut table = SourceTable::new(
        &env,
        &[
            ("main", "import * as util from \"util\"\nexport const answer = util.answer"),
            ("util", "export const answer = 42\nexport default \"util\""),
        ],
    );
    let root = table.load("main").unwrap();

    let namespace = run_module(&root, &mut table).unwrap();

    assert_eq!(namespace.get("answer"), TestValue::Number(42.0));
    assert!(root.is_linked());
}

#[test]
fn test_run_module_uses_configured_timeout() {
    init_tracing();
    let config = LinkerConfig {
        execution: ExecutionConfig {
            timeout_ms: Some(40),
            break_on_sigint: false,
        },
    };
    let env = Environment::with_config(TestEngine::new(), config);
    let mut table = SourceTable::new(&env, &[("spin", "while (true) {}")]);
    let root = table.load("spin").unwrap();

    let err = run_module(&root, &mut table).unwrap_err();

    assert_eq!(err, ModuleError::ExecutionTimeout { timeout_ms: 40 });
}

#[test]
fn test_run_module_reports_eval_error() {
    init_tracing();
    let env = Environment::new(TestEngine::new());
    let mut table = SourceTable::new(
        &env,
        &[("main", "import \"dep\""), ("dep", "throw \"dep failed\"")],
    );
    let root = table.load("main").unwrap();

    let err = run_module(&root, &mut table).unwrap_err();

    assert_eq!(err.to_string(), "Uncaught dep failed");
    assert_eq!(root.error(), Some(TestValue::string("dep failed")));
}
