//! Recovery from segmentation faults raised inside one native call.
//!
//! A save point is taken with `sigsetjmp` right before the call, and a SIGSEGV handler jumps back to it. The save
//! point and the handler are process-global, so guarded calls are serialized by one lock.
//!
//! Jumping out of a faulting call skips every destructor between the save point and the fault: whatever the
//! plugin or the guarded closure acquired during the call is leaked or left half-updated. Only faults the OS
//! reports during the call are caught; memory corruption that does not fault goes unnoticed. Treat a recovered
//! crash as a reason to stop using the plugin, not as a normal return.

use std::ffi::{c_int, c_void};
use std::io;
use std::mem;
use std::ptr;
use std::sync::{Mutex, PoisonError};

use tracing::{error, warn};

unsafe extern "C" {
    fn trellis_crash_guard_run(body: unsafe extern "C" fn(*mut c_void), context: *mut c_void) -> c_int;
    fn trellis_crash_guard_on_signal(signal: c_int);
}

static GUARD_LOCK: Mutex<()> = Mutex::new(());

/// Outcome of a guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded<R> {
    /// The call returned normally.
    Completed(R),
    /// The call was abandoned after the given signal.
    Crashed { signal: c_int },
}

impl<R> Guarded<R> {
    pub fn is_crashed(&self) -> bool {
        matches!(self, Guarded::Crashed { .. })
    }
}

/// Installed signal disposition; the previous one is restored on drop.
pub struct SignalHandlerGuard {
    signal: c_int,
    previous: libc::sigaction,
}

impl SignalHandlerGuard {
    /// Install `handler` for `signal`.
    ///
    /// # Safety
    ///
    /// `handler` must be a valid `extern "C" fn(c_int)` that is safe to run in signal context. Signal dispositions
    /// are process-wide; concurrent installs for the same signal restore each other's state in unspecified order.
    pub unsafe fn install(signal: c_int, handler: libc::sighandler_t) -> io::Result<Self> {
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = handler;
        action.sa_flags = 0;
        unsafe { libc::sigemptyset(&mut action.sa_mask) };

        let mut previous: libc::sigaction = unsafe { mem::zeroed() };
        if unsafe { libc::sigaction(signal, &action, &mut previous) } != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { signal, previous })
    }

    pub fn signal(&self) -> c_int {
        self.signal
    }
}

impl Drop for SignalHandlerGuard {
    fn drop(&mut self) {
        if unsafe { libc::sigaction(self.signal, &self.previous, ptr::null_mut()) } != 0 {
            error!(signal = self.signal, error = %io::Error::last_os_error(), "failed to restore signal handler");
        }
    }
}

struct Invocation<F, R> {
    body: Option<F>,
    result: Option<R>,
}

unsafe extern "C" fn run_invocation<F, R>(context: *mut c_void)
where
    F: FnOnce() -> R,
{
    let invocation = unsafe { &mut *context.cast::<Invocation<F, R>>() };
    if let Some(body) = invocation.body.take() {
        invocation.result = Some(body());
    }
}

/// Run `body` with SIGSEGV recovery.
///
/// A panic inside `body` aborts the process, since it cannot unwind through the C save point.
///
/// # Safety
///
/// If `body` faults, none of the destructors between the call and the fault run, including those of values the
/// closure captured. `body` must not hold locks or other state that would be left inconsistent.
pub unsafe fn guard<F, R>(body: F) -> io::Result<Guarded<R>>
where
    F: FnOnce() -> R,
{
    let _lock = GUARD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let handler = unsafe {
        SignalHandlerGuard::install(libc::SIGSEGV, trellis_crash_guard_on_signal as *const () as libc::sighandler_t)?
    };

    let mut invocation = Invocation { body: Some(body), result: None };
    let context = ptr::addr_of_mut!(invocation).cast::<c_void>();
    let signal = unsafe { trellis_crash_guard_run(run_invocation::<F, R>, context) };
    drop(handler);

    // On a crash the closure was already moved into the abandoned frame; its captures are never dropped.
    if signal != 0 {
        return Ok(Guarded::Crashed { signal });
    }

    match invocation.result {
        Some(result) => Ok(Guarded::Completed(result)),
        None => Ok(Guarded::Crashed { signal: libc::SIGSEGV }),
    }
}

/// Run `body` with SIGSEGV recovery, substituting `R::default()` for the result of a crashed call.
///
/// # Safety
///
/// See [`guard`].
pub unsafe fn safe_call<F, R>(body: F) -> R
where
    F: FnOnce() -> R,
    R: Default,
{
    match unsafe { guard(body) } {
        Ok(Guarded::Completed(result)) => result,
        Ok(Guarded::Crashed { signal }) => {
            warn!(signal, "recovered from a crash inside a guarded native call");
            R::default()
        }
        Err(err) => {
            error!(error = %err, "could not install the crash handler; call skipped");
            R::default()
        }
    }
}

/// Run `body` with `handler` installed for `signal`, restoring the previous disposition afterwards.
///
/// No recovery takes place; whatever the handler does happens in signal context. The crash-guard lock is not
/// taken, so this may wrap a call that itself uses [`safe_call`].
///
/// # Safety
///
/// See [`SignalHandlerGuard::install`].
pub unsafe fn with_signal_handler<F, R>(signal: c_int, handler: extern "C" fn(c_int), body: F) -> io::Result<R>
where
    F: FnOnce() -> R,
{
    let _handler = unsafe { SignalHandlerGuard::install(signal, handler as *const () as libc::sighandler_t)? };
    Ok(body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    static USR1_SEEN: AtomicBool = AtomicBool::new(false);

    extern "C" fn record_usr1(_signal: c_int) {
        USR1_SEEN.store(true, Ordering::SeqCst);
    }

    fn current_handler(signal: c_int) -> libc::sighandler_t {
        let mut current: libc::sigaction = unsafe { mem::zeroed() };
        assert_eq!(unsafe { libc::sigaction(signal, ptr::null(), &mut current) }, 0);
        current.sa_sigaction
    }

    #[test]
    fn test_guard_completes() {
        let outcome = unsafe { guard(|| 40 + 2) }.unwrap();
        assert_eq!(outcome, Guarded::Completed(42));
        assert!(!outcome.is_crashed());
    }

    #[test]
    fn test_guard_reports_segfault() {
        let outcome: Guarded<i32> = unsafe {
            guard(|| {
                libc::raise(libc::SIGSEGV);
                1
            })
        }
        .unwrap();
        assert_eq!(outcome, Guarded::Crashed { signal: libc::SIGSEGV });
    }

    #[test]
    fn test_safe_call_returns_default_after_crash() {
        let value: u64 = unsafe {
            safe_call(|| {
                libc::raise(libc::SIGSEGV);
                99
            })
        };
        assert_eq!(value, 0);

        let value: String = unsafe { safe_call(|| "still usable".to_string()) };
        assert_eq!(value, "still usable");
    }

    #[test]
    fn test_with_signal_handler_restores_previous() {
        let before = current_handler(libc::SIGUSR1);
        let result = unsafe {
            with_signal_handler(libc::SIGUSR1, record_usr1, || {
                libc::raise(libc::SIGUSR1);
                "done"
            })
        }
        .unwrap();

        assert_eq!(result, "done");
        assert!(USR1_SEEN.load(Ordering::SeqCst));
        assert_eq!(current_handler(libc::SIGUSR1), before);
    }

    #[test]
    fn test_install_rejects_invalid_signal() {
        let result = unsafe { SignalHandlerGuard::install(-1, libc::SIG_IGN) };
        assert!(result.is_err());
    }
}
