//! Long-lived worker services.
//!
//! The manager and extension roles each run two services (an RPC server and
//! a watcher) on dedicated threads. A service is a named thread plus an
//! interrupt flag; the owner stops services in reverse construction order
//! and joins them. Loops inside a service sleep through
//! [`InterruptFlag::pause_millis`] so an interrupt is honored within one
//! heartbeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::delay::INIT_LATENCY_MS;
use crate::error::ExtensionError;

/// Cooperative interrupt flag shared between a service and its owner.
#[derive(Clone, Default, Debug)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Creates a fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the service to wind down.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once an interrupt has been requested.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `ms` milliseconds in short slices, returning early when
    /// interrupted.
    pub fn pause_millis(&self, ms: u64) {
        let mut remaining = ms;
        while remaining > 0 && !self.interrupted() {
            let slice = remaining.min(INIT_LATENCY_MS);
            thread::sleep(Duration::from_millis(slice));
            remaining -= slice;
        }
    }
}

/// Handle to a running service thread.
#[derive(Debug)]
pub struct ServiceHandle {
    name: &'static str,
    flag: InterruptFlag,
    thread: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Spawns a named worker. The body receives the interrupt flag and is
    /// expected to poll it.
    pub fn spawn<F>(name: &'static str, body: F) -> Result<Self, ExtensionError>
    where
        F: FnOnce(InterruptFlag) + Send + 'static,
    {
        let flag = InterruptFlag::new();
        let body_flag = flag.clone();
        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || body(body_flag))
            .map_err(|e| ExtensionError::Service(format!("cannot spawn {name}: {e}")))?;
        debug!("Service {} started", name);
        Ok(Self {
            name,
            flag,
            thread: Some(thread),
        })
    }

    /// Service name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the service to stop without waiting for it.
    pub fn stop(&self) {
        self.flag.interrupt();
    }

    /// Signals the service and waits for its thread to finish.
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        debug!("Service {} stopped", self.name);
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Receives process-shutdown intent from watchers and RPC handlers.
///
/// The default implementation terminates the process; tests substitute a
/// recorder so exit intent can be asserted without dying.
pub trait ShutdownRequester: Send + Sync {
    /// Requests a host-wide shutdown with the given exit code.
    fn request_shutdown(&self, code: i32);
}

/// Shutdown requester that exits the current process.
#[derive(Debug, Default)]
pub struct ProcessShutdown;

impl ShutdownRequester for ProcessShutdown {
    fn request_shutdown(&self, code: i32) {
        info!("Process shutdown requested (code {})", code);
        std::process::exit(code);
    }
}

/// Shutdown requester that records the first requested exit code.
#[derive(Debug, Default)]
pub struct RecordingShutdown {
    requested: AtomicBool,
    code: AtomicI32,
}

impl RecordingShutdown {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit code of the first shutdown request, if any was made.
    #[must_use]
    pub fn requested_code(&self) -> Option<i32> {
        if self.requested.load(Ordering::SeqCst) {
            Some(self.code.load(Ordering::SeqCst))
        } else {
            None
        }
    }
}

impl ShutdownRequester for RecordingShutdown {
    fn request_shutdown(&self, code: i32) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.code.store(code, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_service_runs_and_joins() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();
        let service = ServiceHandle::spawn("test-service", move |flag| {
            while !flag.interrupted() {
                ticks_clone.fetch_add(1, Ordering::SeqCst);
                flag.pause_millis(5);
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        service.join();
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_pause_is_interruptible() {
        let flag = InterruptFlag::new();
        let waiter = flag.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || waiter.pause_millis(5_000));
        thread::sleep(Duration::from_millis(30));
        flag.interrupt();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_millis(1_000));
    }

    #[test]
    fn test_recording_shutdown_keeps_first_code() {
        let recorder = RecordingShutdown::new();
        assert_eq!(recorder.requested_code(), None);
        recorder.request_shutdown(0);
        recorder.request_shutdown(9);
        assert_eq!(recorder.requested_code(), Some(0));
    }
}
