use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide user-break flag.
///
/// A break can be raised from any thread, including the ctrlc handler
/// thread and the async stdin reader. Blocking socket calls observe the
/// flag on every poll tick, so a raised break unwinds them within one
/// tick. The flag is latched: repeated raises before a clear are
/// idempotent, and only an explicit [`clear`] rearms it.
static BREAK_FLAG: AtomicBool = AtomicBool::new(false);

/// Raises the user-break flag. Safe from any thread.
pub fn raise() {
    BREAK_FLAG.store(true, Ordering::SeqCst);
}

/// Clears the user-break flag.
pub fn clear() {
    BREAK_FLAG.store(false, Ordering::SeqCst);
}

/// Returns the current state of the flag without clearing it.
pub fn check() -> bool {
    BREAK_FLAG.load(Ordering::SeqCst)
}

/// Routes Ctrl-C to [`raise`]. Binaries call this once at startup;
/// the library never installs the handler on its own.
pub fn install_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        println!("\nKeyboard interrupt received (ctrl+C).");
        raise();
    })
}

#[cfg(test)]
pub(crate) mod testsup {
    use std::sync::{Mutex, MutexGuard};

    // The break flag is process-global, so tests that raise it, or that
    // block on socket reads a concurrent raise would unwind, take this
    // lock and run one at a time.
    static LOCK: Mutex<()> = Mutex::new(());

    pub fn lock() -> MutexGuard<'static, ()> {
        LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_is_latched_and_idempotent() {
        let _serial = testsup::lock();

        clear();
        assert!(!check());

        raise();
        assert!(check());
        // check() must not consume the flag.
        assert!(check());

        raise();
        assert!(check());

        clear();
        assert!(!check());
    }
}
