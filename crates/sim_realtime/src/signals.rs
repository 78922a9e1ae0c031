//! Async-signal-safe OS signal capture.
//!
//! Handlers do exactly two things: store the signal number in a process
//! scope atomic and raise the notify flag the simulator polls. A second
//! fatal signal (SIGINT/SIGTERM) while the first is still pending
//! re-emulates the default handler, so a double interrupt terminates the
//! process immediately.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

pub use signal_hook::consts::{SIGALRM, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};

static SIG_END_FROM_OS: AtomicI32 = AtomicI32::new(0);
static SIG_USR_FROM_OS: AtomicI32 = AtomicI32::new(0);
static SIG_ALRM_FROM_OS: AtomicI32 = AtomicI32::new(0);
static NOTIFIED: AtomicBool = AtomicBool::new(false);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the handlers for SIGINT/SIGTERM (end), SIGUSR1/SIGUSR2 (user),
/// and SIGALRM (alarm). Installing twice is a no-op.
///
/// # Errors
///
/// Propagates handler-registration failures.
pub fn install_signal_handlers() -> std::io::Result<()> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        tracing::warn!("signal handlers already installed, skipping");
        return Ok(());
    }

    for sig in [SIGINT, SIGTERM] {
        // SAFETY: the handler only performs atomic stores and the
        // async-signal-safe default-handler emulation.
        unsafe {
            signal_hook::low_level::register(sig, move || {
                if SIG_END_FROM_OS.swap(sig, Ordering::SeqCst) != 0 {
                    let _ = signal_hook::low_level::emulate_default_handler(sig);
                }
                NOTIFIED.store(true, Ordering::SeqCst);
            })?;
        }
    }
    for sig in [SIGUSR1, SIGUSR2] {
        // SAFETY: atomic stores only.
        unsafe {
            signal_hook::low_level::register(sig, move || {
                SIG_USR_FROM_OS.store(sig, Ordering::SeqCst);
                NOTIFIED.store(true, Ordering::SeqCst);
            })?;
        }
    }
    // SAFETY: atomic stores only.
    unsafe {
        signal_hook::low_level::register(SIGALRM, || {
            SIG_ALRM_FROM_OS.store(SIGALRM, Ordering::SeqCst);
            NOTIFIED.store(true, Ordering::SeqCst);
        })?;
    }

    tracing::debug!("signal handler registration completed");
    Ok(())
}

/// Clear and return the notify flag. Cheap enough for every poll.
pub fn take_notified() -> bool {
    NOTIFIED.swap(false, Ordering::SeqCst)
}

/// Transfer the pending OS signal numbers (end, user, alarm), clearing
/// them.
pub fn take_os_signals() -> (i32, i32, i32) {
    (
        SIG_END_FROM_OS.swap(0, Ordering::SeqCst),
        SIG_USR_FROM_OS.swap(0, Ordering::SeqCst),
        SIG_ALRM_FROM_OS.swap(0, Ordering::SeqCst),
    )
}

/// Serializes tests that touch the process-global signal flags.
#[cfg(test)]
pub(crate) static TEST_SIGNAL_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Inject a signal as if the OS delivered it. Test hook.
pub fn inject_signal(sig: i32) {
    match sig {
        s if s == SIGINT || s == SIGTERM => SIG_END_FROM_OS.store(s, Ordering::SeqCst),
        s if s == SIGUSR1 || s == SIGUSR2 => SIG_USR_FROM_OS.store(s, Ordering::SeqCst),
        s if s == SIGALRM => SIG_ALRM_FROM_OS.store(s, Ordering::SeqCst),
        _ => return,
    }
    NOTIFIED.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_and_take() {
        let _guard = TEST_SIGNAL_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inject_signal(SIGUSR1);
        assert!(take_notified());
        let (end, usr, alrm) = take_os_signals();
        assert_eq!(end, 0);
        assert_eq!(usr, SIGUSR1);
        assert_eq!(alrm, 0);

        // Flags are cleared by the transfer.
        let (end, usr, alrm) = take_os_signals();
        assert_eq!((end, usr, alrm), (0, 0, 0));
        assert!(!take_notified());
    }
}
