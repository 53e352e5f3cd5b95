//! Process signals and the flags the event loop checks.
//!
//! SIGINT and SIGTERM ask for an orderly shutdown, SIGHUP for a
//! restart of all plugins.  SIGPIPE is ignored so that writing to a
//! client that went away is an ordinary error.
//!
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static TERMINATE: AtomicBool = AtomicBool::new(false);
static RESTART: AtomicBool = AtomicBool::new(false);

extern "C" fn terminate_handler(_sig: libc::c_int) {
    TERMINATE.store(true, Ordering::Relaxed);
}
extern "C" fn restart_handler(_sig: libc::c_int) {
    RESTART.store(true, Ordering::Relaxed);
}

///
/// How the event loop learns it should stop or restart plugins.
/// Clones share the same flags, so a handle can be kept by another
/// thread to stop a server.  Only handles from install() also see
/// the process signals.
///
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    restart: Arc<AtomicBool>,
    signals: bool,
}

impl StopHandle {
    pub fn new() -> StopHandle {
        StopHandle::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
    pub fn request_restart(&self) {
        self.restart.store(true, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || (self.signals && TERMINATE.load(Ordering::Relaxed))
    }
    ///
    /// True once per restart request.
    ///
    pub fn take_restart(&self) -> bool {
        let requested = self.restart.swap(false, Ordering::Relaxed);
        let signalled = self.signals && RESTART.swap(false, Ordering::Relaxed);
        requested || signalled
    }
}

///
/// Install the handlers and return a handle that sees them.
///
pub fn install() -> StopHandle {
    // The handlers only store to atomics.
    unsafe {
        libc::signal(libc::SIGINT, terminate_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, terminate_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGHUP, restart_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
    StopHandle {
        signals: true,
        ..StopHandle::default()
    }
}

#[cfg(test)]
mod signals_test {
    use super::*;

    #[test]
    fn handle_flags() {
        let h = StopHandle::new();
        let other = h.clone();
        assert!(!h.stop_requested());
        assert!(!h.take_restart());
        other.request_restart();
        assert!(h.take_restart());
        assert!(!h.take_restart());
        other.request_stop();
        assert!(h.stop_requested());
    }

    #[test]
    fn plain_handle_ignores_signals() {
        TERMINATE.store(true, Ordering::Relaxed);
        let h = StopHandle::new();
        assert!(!h.stop_requested());
        TERMINATE.store(false, Ordering::Relaxed);
    }
}
