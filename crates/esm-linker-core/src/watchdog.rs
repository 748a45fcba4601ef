//! Evaluation guards.
//!
//! Both guards run off the evaluating thread and do exactly two things when
//! they fire: set their own flag and ask the engine to terminate execution.
//! They never touch records or registries.
//!
//! - [`Watchdog`]: wall-clock deadline, one timer thread per guard
//! - [`SigintWatchdog`]: process `SIGINT` handler, installed while at least
//!   one guard is alive and restored to the previous disposition afterwards

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::engine::TerminationControl;

/// Deadline guard for one evaluation.
///
/// The timer runs on its own thread with a current-thread Tokio runtime, so
/// it fires even while the evaluating thread is blocked inside the engine.
pub struct Watchdog {
    cancel: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    timed_out: Arc<AtomicBool>,
}

impl Watchdog {
    /// Arm a timer that terminates execution after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer thread cannot be spawned.
    pub fn start(
        timeout: Duration,
        termination: Arc<dyn TerminationControl>,
    ) -> io::Result<Self> {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let timed_out = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&timed_out);

        let thread = thread::Builder::new()
            .name("esm-timeout-watchdog".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "Failed to start watchdog timer");
                        return;
                    }
                };

                runtime.block_on(async move {
                    tokio::select! {
                        () = tokio::time::sleep(timeout) => {
                            flag.store(true, Ordering::SeqCst);
                            termination.terminate_execution();
                            debug!(timeout_ms = timeout.as_millis(), "Evaluation deadline reached");
                        }
                        _ = cancel_rx => {}
                    }
                });
            })?;

        Ok(Self {
            cancel: Some(cancel_tx),
            thread: Some(thread),
            timed_out,
        })
    }

    /// Returns `true` if this guard's deadline fired.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Disarm the timer and wait for its thread.
    ///
    /// Returns whether the deadline fired before the guard was stopped.
    pub fn stop(mut self) -> bool {
        self.shutdown();
        self.timed_out()
    }

    fn shutdown(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            // The receiver is gone if the deadline already fired
            let _ = cancel.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Watchdog timer thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `SIGINT` guard for one evaluation.
///
/// Guards nest: the handler is installed by the first live guard and the
/// previous disposition is restored when the last one stops. A signal is
/// delivered to the most recently started guard only.
///
/// On non-unix targets the guard is inert.
pub struct SigintWatchdog {
    state: Arc<SigintState>,
    active: bool,
}

struct SigintState {
    termination: Arc<dyn TerminationControl>,
    received: AtomicBool,
}

impl SigintWatchdog {
    /// Install (or join) the process `SIGINT` handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler cannot be installed or its helper
    /// thread cannot be spawned.
    pub fn start(termination: Arc<dyn TerminationControl>) -> io::Result<Self> {
        let state = Arc::new(SigintState {
            termination,
            received: AtomicBool::new(false),
        });

        #[cfg(unix)]
        sigint::push(Arc::clone(&state))?;

        #[cfg(not(unix))]
        tracing::warn!("SIGINT watchdog is not supported on this platform");

        Ok(Self {
            state,
            active: true,
        })
    }

    /// Returns `true` if a signal was delivered to this guard.
    pub fn received(&self) -> bool {
        self.state.received.load(Ordering::SeqCst)
    }

    /// Leave the handler, restoring the previous disposition if this was the
    /// last guard.
    ///
    /// Returns whether a signal was delivered to this guard.
    pub fn stop(mut self) -> bool {
        self.shutdown();
        self.received()
    }

    fn shutdown(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }

        #[cfg(unix)]
        sigint::pop(&self.state);
    }
}

impl Drop for SigintWatchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
mod sigint {
    //! Process-wide `SIGINT` plumbing.
    //!
    //! The signal handler only writes a byte to a socket pair; a helper thread
    //! reads it and dispatches to the innermost guard outside signal context.

    use std::io::{self, Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Arc, LazyLock};
    use std::thread::{self, JoinHandle};

    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use parking_lot::Mutex;
    use tracing::{debug, error, info};

    use super::SigintState;

    const WAKE: u8 = 1;
    const STOP: u8 = 0;

    static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
    static HELPER: LazyLock<Mutex<SigintHelper>> =
        LazyLock::new(|| Mutex::new(SigintHelper::default()));

    #[derive(Default)]
    struct SigintHelper {
        guards: Vec<Arc<SigintState>>,
        running: Option<Running>,
    }

    struct Running {
        previous: SigAction,
        writer: UnixStream,
        thread: JoinHandle<()>,
    }

    extern "C" fn handle_sigint(_: nix::libc::c_int) {
        let fd = WAKE_FD.load(Ordering::SeqCst);
        if fd >= 0 {
            let byte = WAKE;
            // SAFETY: write(2) is async-signal-safe and the fd stays open
            // while the handler is installed.
            unsafe {
                nix::libc::write(fd, std::ptr::addr_of!(byte).cast(), 1);
            }
        }
    }

    pub(super) fn push(state: Arc<SigintState>) -> io::Result<()> {
        let mut helper = HELPER.lock();
        if helper.running.is_none() {
            helper.running = Some(Running::start()?);
        }
        helper.guards.push(state);
        Ok(())
    }

    pub(super) fn pop(state: &Arc<SigintState>) {
        let finished = {
            let mut helper = HELPER.lock();
            if let Some(index) = helper
                .guards
                .iter()
                .rposition(|guard| Arc::ptr_eq(guard, state))
            {
                helper.guards.remove(index);
            }
            if helper.guards.is_empty() {
                // Restore under the lock so a concurrent start saves the
                // original disposition, not ours
                helper.running.take().map(Running::uninstall)
            } else {
                None
            }
        };

        // The helper thread takes the lock to dispatch, so join outside it
        if let Some(running) = finished {
            running.join();
        }
    }

    impl Running {
        fn start() -> io::Result<Self> {
            let (mut reader, writer) = UnixStream::pair()?;
            writer.set_nonblocking(true)?;

            let thread = thread::Builder::new()
                .name("esm-sigint-watchdog".to_string())
                .spawn(move || run_helper(&mut reader))?;

            WAKE_FD.store(writer.as_raw_fd(), Ordering::SeqCst);

            let action = SigAction::new(
                SigHandler::Handler(handle_sigint),
                SaFlags::SA_RESTART,
                SigSet::empty(),
            );
            // SAFETY: the handler only performs an async-signal-safe write.
            let previous = match unsafe { signal::sigaction(Signal::SIGINT, &action) } {
                Ok(previous) => previous,
                Err(errno) => {
                    WAKE_FD.store(-1, Ordering::SeqCst);
                    let _ = (&writer).write_all(&[STOP]);
                    let _ = thread.join();
                    return Err(io::Error::from(errno));
                }
            };

            debug!("SIGINT handler installed");
            Ok(Self {
                previous,
                writer,
                thread,
            })
        }

        fn uninstall(self) -> Self {
            // SAFETY: restores the disposition saved when installing.
            if let Err(errno) = unsafe { signal::sigaction(Signal::SIGINT, &self.previous) } {
                error!(error = %errno, "Failed to restore SIGINT disposition");
            }
            WAKE_FD.store(-1, Ordering::SeqCst);
            debug!("SIGINT handler restored");
            self
        }

        fn join(self) {
            if let Err(e) = (&self.writer).write_all(&[STOP]) {
                error!(error = %e, "Failed to stop SIGINT helper");
                return;
            }
            if self.thread.join().is_err() {
                error!("SIGINT helper thread panicked");
            }
        }
    }

    fn run_helper(reader: &mut UnixStream) {
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte) {
                Ok(0) => return,
                Ok(_) if byte[0] == STOP => return,
                Ok(_) => dispatch(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, "SIGINT helper read failed");
                    return;
                }
            }
        }
    }

    fn dispatch() {
        let innermost = HELPER.lock().guards.last().cloned();
        if let Some(state) = innermost {
            state.received.store(true, Ordering::SeqCst);
            state.termination.terminate_execution();
            info!("SIGINT received, terminating evaluation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[derive(Default)]
    struct CountingTermination {
        terminations: AtomicUsize,
    }

    impl TerminationControl for CountingTermination {
        fn terminate_execution(&self) {
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel_terminate_execution(&self) {}

        fn is_execution_terminating(&self) -> bool {
            self.terminations.load(Ordering::SeqCst) > 0
        }
    }

    #[test]
    fn test_watchdog_fires_after_deadline() {
        let termination = Arc::new(CountingTermination::default());
        let watchdog = Watchdog::start(Duration::from_millis(20), termination.clone()).unwrap();

        thread::sleep(Duration::from_millis(100));

        assert!(watchdog.timed_out());
        assert!(watchdog.stop());
        assert_eq!(termination.terminations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_watchdog_stopped_before_deadline() {
        let termination = Arc::new(CountingTermination::default());
        let watchdog = Watchdog::start(Duration::from_secs(30), termination.clone()).unwrap();

        let start = Instant::now();
        assert!(!watchdog.stop());

        // Stopping must not wait for the deadline
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(termination.terminations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_nested_watchdogs_keep_separate_flags() {
        let termination = Arc::new(CountingTermination::default());
        let outer = Watchdog::start(Duration::from_secs(30), termination.clone()).unwrap();
        let inner = Watchdog::start(Duration::from_millis(10), termination.clone()).unwrap();

        thread::sleep(Duration::from_millis(80));

        assert!(inner.stop());
        assert!(!outer.stop());
    }

    #[test]
    fn test_sigint_watchdog_without_signal() {
        let termination = Arc::new(CountingTermination::default());
        let watchdog = SigintWatchdog::start(termination.clone()).unwrap();

        assert!(!watchdog.received());
        assert!(!watchdog.stop());
        assert_eq!(termination.terminations.load(Ordering::SeqCst), 0);
    }
}
