//! Shutdown on Ctrl+C (SIGINT) or SIGTERM.
//!
//! The handler only raises [`SHUTDOWN_REQUESTED`]. The main loop checks it once per poll cycle,
//! and `main` switches the LED off and exits once the loop has returned.

use std::sync::atomic::{AtomicBool, Ordering};
use eyre::eyre;
use log::debug;

/// Set once a shutdown signal arrives. Never cleared.
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Only touches an atomic, so it is async-signal-safe.
extern "C" fn handle_shutdown_signal(_: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs the shutdown handler for SIGINT and SIGTERM.
pub fn install_shutdown_handler() -> eyre::Result<()> {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        install_handler(signal)?;
    }
    debug!("Shutdown handler installed.");
    Ok(())
}

fn install_handler(signal: libc::c_int) -> eyre::Result<()> {
    // SAFETY: handle_shutdown_signal is an extern "C" handler that only stores to an atomic.
    let result = unsafe {
        let handler = handle_shutdown_signal as *const () as libc::sighandler_t;
        libc::signal(signal, handler)
    };
    if result == libc::SIG_ERR {
        return Err(eyre!("Failed to install handler for signal {}", signal));
    }
    Ok(())
}
