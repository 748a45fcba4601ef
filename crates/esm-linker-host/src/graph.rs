//! Graph linking helpers.
//!
//! The linker only answers the engine's point queries; somebody has to fill
//! every resolve cache in the graph first. [`link_module_graph`] does that
//! with a caller-supplied [`ModuleResolver`], and [`run_module`] adds
//! instantiation and evaluation on top.

use std::time::Instant;

use tracing::{debug, info, instrument};

use esm_linker_common::ModuleError;
use esm_linker_core::{EvaluateOptions, ModuleRecord, ScriptEngine};

/// Resolution policy used while walking a graph.
///
/// Implemented for closures
/// `FnMut(&str, &ModuleRecord<E>) -> Result<ModuleRecord<E>, ModuleError>`.
pub trait ModuleResolver<E: ScriptEngine> {
    /// Produce the record `specifier` resolves to when requested by `referrer`.
    ///
    /// # Errors
    ///
    /// Any error aborts the walk and is returned to the caller.
    fn resolve(
        &mut self,
        specifier: &str,
        referrer: &ModuleRecord<E>,
    ) -> Result<ModuleRecord<E>, ModuleError>;
}

impl<E, F> ModuleResolver<E> for F
where
    E: ScriptEngine,
    F: FnMut(&str, &ModuleRecord<E>) -> Result<ModuleRecord<E>, ModuleError>,
{
    fn resolve(
        &mut self,
        specifier: &str,
        referrer: &ModuleRecord<E>,
    ) -> Result<ModuleRecord<E>, ModuleError> {
        self(specifier, referrer)
    }
}

/// Fill the resolve cache of every unlinked record reachable from `root`.
///
/// Each record is visited once, depth-first; already linked records are
/// neither resolved nor descended into. Returns the visited records, `root`
/// first.
///
/// # Errors
///
/// Returns an error if the resolver fails or rejects a specifier, or if
/// `resolve_dependency` fails.
#[instrument(skip(root, resolver), fields(root = %root.url()))]
pub fn link_module_graph<E: ScriptEngine>(
    root: &ModuleRecord<E>,
    resolver: &mut impl ModuleResolver<E>,
) -> Result<Vec<ModuleRecord<E>>, ModuleError> {
    let mut visited = vec![root.clone()];
    let mut pending = vec![root.clone()];

    while let Some(record) = pending.pop() {
        if record.is_linked() {
            continue;
        }

        for specifier in record.dependency_specifiers() {
            let dependency = resolver.resolve(&specifier, &record)?;
            record.resolve_dependency(&specifier, &dependency)?;

            if !visited.iter().any(|seen| seen.ptr_eq(&dependency)) {
                debug!(specifier, dependency = %dependency.url(), "Discovered module");
                visited.push(dependency.clone());
                pending.push(dependency);
            }
        }
    }

    Ok(visited)
}

/// Link, instantiate and evaluate the graph rooted at `root`.
///
/// Evaluation uses the environment's configured execution defaults. Returns
/// the root's namespace.
///
/// # Errors
///
/// Returns the first error from linking, instantiation or evaluation. After
/// an evaluation error the thrown value is available from
/// [`ModuleRecord::error`].
#[instrument(skip(root, resolver), fields(root = %root.url()))]
pub fn run_module<E: ScriptEngine>(
    root: &ModuleRecord<E>,
    resolver: &mut impl ModuleResolver<E>,
) -> Result<E::Value, ModuleError> {
    let start = Instant::now();

    let graph = link_module_graph(root, resolver)?;
    root.instantiate()?;

    let options = root
        .context()
        .environment()
        .map(|env| EvaluateOptions::from(&env.config().execution))
        .unwrap_or_default();
    root.evaluate(options)?;

    info!(
        modules = graph.len(),
        duration_ms = start.elapsed().as_millis(),
        "Module graph executed"
    );

    root.namespace()
}
