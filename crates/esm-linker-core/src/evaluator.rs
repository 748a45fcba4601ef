//! Guarded evaluation.
//!
//! [`ModuleRecord::evaluate`] runs the engine's evaluation of one record under
//! the guards selected by [`EvaluateOptions`]:
//!
//! 1. Start the timeout and `SIGINT` watchdogs, if requested
//! 2. Evaluate through the engine
//! 3. Stop both watchdogs and read their flags
//! 4. If a watchdog fired, cancel the engine's termination before reporting
//!    the cancellation, so the next evaluation in the context runs normally

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use esm_linker_common::{ExecutionConfig, ModuleError};

use crate::engine::ScriptEngine;
use crate::module::ModuleRecord;
use crate::watchdog::{SigintWatchdog, Watchdog};

/// Guards for one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluateOptions {
    /// Deadline in milliseconds; `None` disables the timeout watchdog.
    pub timeout_ms: Option<u64>,
    /// Terminate evaluation when the process receives `SIGINT`.
    pub break_on_sigint: bool,
}

impl EvaluateOptions {
    /// No timeout, not interruptible.
    pub const fn new() -> Self {
        Self {
            timeout_ms: None,
            break_on_sigint: false,
        }
    }

    /// Set the deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Enable or disable the `SIGINT` watchdog.
    #[must_use]
    pub const fn with_break_on_sigint(mut self, break_on_sigint: bool) -> Self {
        self.break_on_sigint = break_on_sigint;
        self
    }

    /// Options in the host protocol encoding, where a negative timeout means
    /// "no timeout".
    pub fn from_raw(timeout_ms: i64, break_on_sigint: bool) -> Self {
        Self {
            timeout_ms: u64::try_from(timeout_ms).ok(),
            break_on_sigint,
        }
    }
}

impl From<&ExecutionConfig> for EvaluateOptions {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            timeout_ms: config.timeout_ms,
            break_on_sigint: config.break_on_sigint,
        }
    }
}

impl<E: ScriptEngine> ModuleRecord<E> {
    /// Evaluate the module, returning its completion value.
    ///
    /// # Arguments
    ///
    /// * `options` - Timeout and interrupt guards for this call
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The deadline fired (`ModuleError::ExecutionTimeout`)
    /// - `SIGINT` arrived while interruptible (`ModuleError::ExecutionInterrupted`)
    /// - The module threw (`ModuleError::Eval`); the thrown value stays
    ///   available through [`ModuleRecord::error`]
    /// - A watchdog could not be started (`ModuleError::InternalFault`)
    #[instrument(skip(self), fields(url = %self.url()))]
    pub fn evaluate(&self, options: EvaluateOptions) -> Result<E::Value, ModuleError> {
        let start = Instant::now();
        let context = self.context();
        let engine = context.engine();
        let termination = engine.termination_control();

        let timeout = match options.timeout_ms {
            Some(timeout_ms) => Some(
                Watchdog::start(Duration::from_millis(timeout_ms), Arc::clone(&termination))
                    .map_err(|e| {
                        ModuleError::internal_fault(format!("failed to start watchdog: {e}"))
                    })?,
            ),
            None => None,
        };
        let sigint = if options.break_on_sigint {
            // A failed start drops `timeout`, which disarms it
            Some(
                SigintWatchdog::start(Arc::clone(&termination)).map_err(|e| {
                    ModuleError::internal_fault(format!("failed to install SIGINT watchdog: {e}"))
                })?,
            )
        } else {
            None
        };

        let result = engine.evaluate(context.id(), self.engine_module());

        let timed_out = timeout.is_some_and(Watchdog::stop);
        let interrupted = sigint.is_some_and(SigintWatchdog::stop);

        if timed_out || interrupted {
            termination.cancel_terminate_execution();

            let duration_ms = start.elapsed().as_millis();
            if timed_out {
                let timeout_ms = options.timeout_ms.unwrap_or_default();
                warn!(timeout_ms, duration_ms, "Evaluation timed out");
                return Err(ModuleError::ExecutionTimeout { timeout_ms });
            }
            warn!(duration_ms, "Evaluation interrupted");
            return Err(ModuleError::ExecutionInterrupted);
        }

        match result {
            Ok(value) => {
                info!(
                    duration_ms = start.elapsed().as_millis(),
                    "Evaluation completed successfully"
                );
                Ok(value)
            }
            Err(exception) => {
                warn!(
                    duration_ms = start.elapsed().as_millis(),
                    message = %exception.message,
                    "Evaluation threw"
                );
                Err(ModuleError::eval(exception.message, exception.location))
            }
        }
    }
}
