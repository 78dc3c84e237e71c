//! Interrupt handling for long regenerations.
//!
//! SIGINT/SIGTERM only flip an atomic flag; the orchestrator polls it
//! between steps and aborts before committing anything.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Cooperative cancellation flag.
/// A default token also observes process-wide interrupts.
#[derive(Debug, Clone)]
pub struct CancelToken
{
    flag: Arc<AtomicBool>,
    observe_signals: bool,
}

impl Default for CancelToken
{
    fn default() -> Self
    {
        Self { flag: Arc::new(AtomicBool::new(false)), observe_signals: true }
    }
}

impl CancelToken
{
    /// A token that ignores signals (tests, embedding).
    pub fn detached() -> Self
    {
        Self { flag: Arc::new(AtomicBool::new(false)), observe_signals: false }
    }

    pub fn cancel(&self)
    {
        self.flag
            .store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool
    {
        self.flag
            .load(Ordering::Relaxed)
            || (self.observe_signals && INTERRUPTED.load(Ordering::Relaxed))
    }
}

#[cfg(unix)]
extern "C" fn handle_interrupt(_signum: libc::c_int)
{
    // Async-signal-safe: a single atomic store
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the interrupt flag.
#[cfg(unix)]
pub fn install_interrupt_handlers() -> io::Result<()>
{
    for signal in [libc::SIGINT, libc::SIGTERM]
    {
        // Safety: the handler only touches an atomic; sigaction is zeroed first
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_interrupt as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask as *mut libc::sigset_t);

            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0
            {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// Without POSIX signals, interrupts terminate the process as usual.
#[cfg(not(unix))]
pub fn install_interrupt_handlers() -> io::Result<()>
{
    Ok(())
}
