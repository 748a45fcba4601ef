//! `SIGINT` handling during evaluation.
//!
//! Kept in its own test binary: the process-wide signal disposition must not
//! be shared with unrelated tests running in parallel.

#![cfg(unix)]

use std::thread;
use std::time::Duration;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use esm_linker_common::ModuleError;
use esm_linker_core::{
    CreateOptions, EvaluateOptions, Environment, ModuleStatus, TerminationControl,
};
use esm_linker_testkit::{TestEngine, TestValue};

#[allow(unsafe_code)]
fn current_disposition() -> SigHandler {
    let probe = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // Swap in a probe and put the original straight back
    let previous = unsafe { signal::sigaction(Signal::SIGINT, &probe) }.unwrap();
    unsafe { signal::sigaction(Signal::SIGINT, &previous) }.unwrap();
    previous.handler()
}

// Everything runs in one test so no other test observes the handler.
#[test]
fn test_sigint_interrupts_evaluation() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let env = Environment::new(TestEngine::new());
    let spinning = env
        .create_module("while (true) {}", "spin.mod", CreateOptions::default())
        .unwrap();
    let healthy = env
        .create_module("\"still here\"", "healthy.mod", CreateOptions::default())
        .unwrap();
    spinning.instantiate().unwrap();
    healthy.instantiate().unwrap();

    let before = current_disposition();

    let signaller = thread::spawn(|| {
        thread::sleep(Duration::from_millis(100));
        signal::raise(Signal::SIGINT).unwrap();
    });
    let result = spinning.evaluate(EvaluateOptions::new().with_break_on_sigint(true));
    signaller.join().unwrap();

    assert_eq!(result, Err(ModuleError::ExecutionInterrupted));
    assert_eq!(spinning.status(), ModuleStatus::Errored);

    let termination = env.engine().termination();
    assert!(!termination.is_execution_terminating());
    assert_eq!(termination.cancellations(), 1);

    // The previous disposition is back in place
    assert_eq!(current_disposition(), before);

    // A generous timeout alongside the interrupt guard does not fire
    let value = healthy
        .evaluate(
            EvaluateOptions::new()
                .with_timeout(10_000)
                .with_break_on_sigint(true),
        )
        .unwrap();
    assert_eq!(value, TestValue::string("still here"));
    assert_eq!(termination.requests(), 1);
}
