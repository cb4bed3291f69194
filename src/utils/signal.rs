use std::sync::atomic::{AtomicBool, Ordering};

static RUNNING: AtomicBool = AtomicBool::new(true);

/// Cooperative keep-running flag, cleared by SIGINT/SIGTERM.
pub fn running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}

pub fn request_stop() {
    RUNNING.store(false, Ordering::SeqCst);
}

#[cfg(unix)]
extern "C" fn on_signal(_: libc::c_int) {
    request_stop();
}

#[cfg(unix)]
pub fn install() {
    // Only an atomic store happens inside the handler.
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
pub fn install() {}
