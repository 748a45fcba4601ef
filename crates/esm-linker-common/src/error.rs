//! Error types for esm-linker.
//!
//! This module defines the error hierarchy using `thiserror`:
//! - [`ModuleError`]: Top-level errors returned by module operations
//! - [`LinkError`]: Contract violations detected while linking a module graph
//! - [`SourceLocation`]: Where in a module's source an engine diagnostic points

use std::fmt::Write as _;

use thiserror::Error;

/// Top-level module errors.
///
/// These errors represent failures across the lifecycle of a module record,
/// from compilation through linking to evaluation, plus failures surfaced to
/// dynamic imports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The engine rejected the module source.
    #[error("{message}")]
    Compile {
        /// Engine diagnostic.
        message: String,
        /// Location of the diagnostic, if the engine reported one.
        location: Option<SourceLocation>,
    },

    /// Linking the module graph failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Evaluation exceeded its deadline and was terminated.
    #[error("Script execution timed out after {timeout_ms}ms")]
    ExecutionTimeout {
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Evaluation was terminated by an interrupt signal.
    #[error("Script execution was interrupted by `SIGINT`")]
    ExecutionInterrupted,

    /// Evaluation threw an uncaught exception.
    ///
    /// The thrown value itself stays available through the module record.
    #[error("{message}")]
    Eval {
        /// Engine description of the exception.
        message: String,
        /// Location of the throw, if known.
        location: Option<SourceLocation>,
    },

    /// The loader configuration does not allow the operation.
    #[error("{reason}")]
    Configuration {
        /// Description of the configuration problem.
        reason: String,
    },

    /// Invoking the loader failed before it could produce a result.
    #[error("Internal loader fault: {reason}")]
    InternalFault {
        /// Description of the fault.
        reason: String,
    },

    /// The namespace was requested before instantiation.
    #[error("cannot get namespace, Module has not been instantiated")]
    NotInstantiated,
}

/// Linking errors.
///
/// Every variant except [`LinkError::Instantiation`] indicates a contract
/// violation by the caller or the loader. None of them are retryable: the
/// record is marked linked regardless of the outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The record was already linked.
    #[error("linking error, already linked")]
    AlreadyLinked,

    /// The specifier is not one the module requested.
    #[error("linking error, invalid specifier '{specifier}'")]
    UnknownSpecifier {
        /// The offending specifier.
        specifier: String,
    },

    /// The dependency is not a live module record of this environment.
    #[error("linking error, expected a valid module object")]
    InvalidTarget,

    /// The engine asked for a dependency that was never resolved.
    #[error("linking error, '{specifier}' from '{referrer}' is not in local cache")]
    UnresolvedDependency {
        /// The requested specifier.
        specifier: String,
        /// Url of the module that requested it.
        referrer: String,
    },

    /// The engine asked on behalf of a module this environment does not own.
    #[error("linking error, null dep for '{specifier}'")]
    NullReferrer {
        /// The requested specifier.
        specifier: String,
    },

    /// The engine failed to instantiate the graph.
    #[error("{message}")]
    Instantiation {
        /// Engine diagnostic.
        message: String,
        /// Location of the diagnostic, if known.
        location: Option<SourceLocation>,
    },
}

/// A position inside module source, as reported by the engine.
///
/// Lines are 1-based, columns are 0-based; both already include the line and
/// column offsets the module was compiled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Resource name (the module url).
    pub resource: String,
    /// Line number.
    pub line: u32,
    /// First column of the offending range.
    pub start_column: u32,
    /// Column just past the offending range.
    pub end_column: u32,
    /// Text of the offending line, when the engine retained it.
    pub source_line: Option<String>,
}

impl SourceLocation {
    /// Create a location without source text.
    pub fn new(resource: impl Into<String>, line: u32, start_column: u32, end_column: u32) -> Self {
        Self {
            resource: resource.into(),
            line,
            start_column,
            end_column,
            source_line: None,
        }
    }

    /// Attach the text of the offending line.
    #[must_use]
    pub fn with_source_line(mut self, source_line: impl Into<String>) -> Self {
        self.source_line = Some(source_line.into());
        self
    }

    /// Render the "arrow" annotation placed above an error's message.
    ///
    /// ```text
    /// file:///app/a.mjs:3
    /// throw new Error("boom");
    /// ^^^^^
    /// ```
    pub fn annotate(&self) -> String {
        let mut out = format!("{}:{}\n", self.resource, self.line);

        if let Some(source_line) = &self.source_line {
            out.push_str(source_line);
            out.push('\n');

            let start = self.start_column as usize;
            let width = self.end_column.saturating_sub(self.start_column).max(1) as usize;
            // Keep tabs so the caret lines up with the source in a terminal
            for ch in source_line.chars().take(start) {
                out.push(if ch == '\t' { '\t' } else { ' ' });
            }
            for _ in source_line.chars().count()..start {
                out.push(' ');
            }
            out.push_str(&"^".repeat(width));
            out.push('\n');
        }

        out
    }
}

impl ModuleError {
    /// Create a new `Compile` error.
    pub fn compile(message: impl Into<String>, location: Option<SourceLocation>) -> Self {
        Self::Compile {
            message: message.into(),
            location,
        }
    }

    /// Create a new `Eval` error.
    pub fn eval(message: impl Into<String>, location: Option<SourceLocation>) -> Self {
        Self::Eval {
            message: message.into(),
            location,
        }
    }

    /// Create a new `Configuration` error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a new `InternalFault` error.
    pub fn internal_fault(reason: impl Into<String>) -> Self {
        Self::InternalFault {
            reason: reason.into(),
        }
    }

    /// Source location carried by the error, if any.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::Compile { location, .. }
            | Self::Eval { location, .. }
            | Self::Link(LinkError::Instantiation { location, .. }) => location.as_ref(),
            _ => None,
        }
    }

    /// The source-line annotation for this error, if it has a location.
    pub fn annotation(&self) -> Option<String> {
        self.location().map(SourceLocation::annotate)
    }

    /// Message decorated with its source-line annotation.
    ///
    /// This is what a host prints for an uncaught module error.
    pub fn decorated(&self) -> String {
        let mut out = self.annotation().unwrap_or_default();
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(out, "{self}");
        out
    }

    /// Returns `true` if this is any linking error.
    pub fn is_link_error(&self) -> bool {
        matches!(self, Self::Link(_))
    }

    /// Returns `true` if evaluation was cancelled by a watchdog.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::ExecutionTimeout { .. } | Self::ExecutionInterrupted
        )
    }
}

impl LinkError {
    /// Create a new `Instantiation` error.
    pub fn instantiation(message: impl Into<String>, location: Option<SourceLocation>) -> Self {
        Self::Instantiation {
            message: message.into(),
            location,
        }
    }
}
