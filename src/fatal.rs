//! Fatal misuse reporting
//!
//! Every misuse of a primitive (double acquisition of an exclusive lock,
//! release by a non-owner, rank violations, destroying a busy primitive, use of
//! a destroyed handle) ends up in [`fatal`]. The function never returns: the
//! report is logged, handed to the installed [`FatalHandler`], and if the
//! handler comes back the thread unwinds with the [`FatalReport`] as a typed
//! panic payload. Embedding code can catch that payload with
//! [`std::panic::catch_unwind`] and decide how to surface it, or install
//! [`AbortOnFatal`] to terminate immediately.

use crate::concurrency::LockDump;
use crate::thread::current_thread_key;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Structured description of an unrecoverable misuse
#[derive(Debug, Clone)]
pub struct FatalReport {
    /// What went wrong, e.g. "acquire on an acquired exclusive lock"
    pub message: String,
    /// State of the offending primitive, when there is one
    pub dump: Option<LockDump>,
    /// Identity of the thread that detected the misuse
    pub thread: usize,
}

impl fmt::Display for FatalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MXUser fatal: {}", self.message)?;
        if let Some(ref dump) = self.dump {
            write!(f, " [{}]", dump)?;
        }
        write!(f, " (thread {:#x})", self.thread)
    }
}

impl std::error::Error for FatalReport {}

/// Receiver of fatal reports
///
/// The handler may log, forward to a supervisor or abort. If it returns, the
/// calling thread still unwinds: a fatal misuse never resumes normal flow.
pub trait FatalHandler: Send + Sync {
    /// Called once per fatal report, on the thread that hit the misuse
    fn on_fatal(&self, report: &FatalReport);
}

impl<F> FatalHandler for F
where
    F: Fn(&FatalReport) + Send + Sync,
{
    fn on_fatal(&self, report: &FatalReport) {
        self(report)
    }
}

/// Handler that terminates the process after printing the report
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnFatal;

impl FatalHandler for AbortOnFatal {
    fn on_fatal(&self, report: &FatalReport) {
        eprintln!("{}", report);
        std::process::abort();
    }
}

static HANDLER: Lazy<RwLock<Option<Arc<dyn FatalHandler>>>> = Lazy::new(|| RwLock::new(None));

/// Set by the host while it is already going down
static IN_PANIC: AtomicBool = AtomicBool::new(false);

thread_local! {
    static REPORTING: Cell<u32> = const { Cell::new(0) };
}

/// Install a fatal handler, returning the previous one
pub fn set_fatal_handler(handler: Arc<dyn FatalHandler>) -> Option<Arc<dyn FatalHandler>> {
    HANDLER.write().replace(handler)
}

/// Remove the installed fatal handler; reports then only log and unwind
pub fn clear_fatal_handler() -> Option<Arc<dyn FatalHandler>> {
    HANDLER.write().take()
}

/// Tell the library the process is already panicking
///
/// Rank checks are skipped from then on so that locks taken by the host's
/// own shutdown reporting cannot trigger a second, recursive fatal.
pub fn set_in_panic(in_panic: bool) {
    IN_PANIC.store(in_panic, Ordering::Release);
}

/// Whether the host has flagged the process as panicking
pub fn in_panic() -> bool {
    IN_PANIC.load(Ordering::Acquire)
}

/// True while rank checking must be skipped on the calling thread
pub(crate) fn rank_checks_suppressed() -> bool {
    in_panic() || REPORTING.with(|r| r.get() > 0)
}

struct ReportingGuard;

impl ReportingGuard {
    fn enter() -> Self {
        REPORTING.with(|r| r.set(r.get() + 1));
        ReportingGuard
    }
}

impl Drop for ReportingGuard {
    fn drop(&mut self) {
        REPORTING.with(|r| r.set(r.get().saturating_sub(1)));
    }
}

/// Report an unrecoverable misuse. Never returns.
#[cold]
#[track_caller]
pub fn fatal(dump: Option<LockDump>, message: impl Into<String>) -> ! {
    let _reporting = ReportingGuard::enter();
    let report = FatalReport {
        message: message.into(),
        dump,
        thread: current_thread_key().get(),
    };

    log::error!("{} at {}", report, std::panic::Location::caller());

    let handler = HANDLER.read().clone();
    if let Some(handler) = handler {
        handler.on_fatal(&report);
    }

    std::panic::panic_any(report)
}

/// Internal consistency check routed to [`fatal`]
#[macro_export]
macro_rules! mx_verify {
    ($expr:expr) => {
        if !($expr) {
            $crate::fatal::fatal(
                None,
                format!("{}:{}: verify({}) failed", file!(), line!(), stringify!($expr)),
            );
        }
    };
    ($expr:expr, $fmt:expr $(, $args:expr)*) => {
        if !($expr) {
            $crate::fatal::fatal(
                None,
                format!("{}:{}: verify({}) failed: {}",
                    file!(), line!(), stringify!($expr), format!($fmt $(, $args)*)),
            );
        }
    };
}

/// Run `f` and return the fatal report it raised, if any
///
/// Intended for tests and for supervisors that convert fatal misuse into
/// their own reporting.
pub fn catch_fatal<F, R>(f: F) -> std::result::Result<R, FatalReport>
where
    F: FnOnce() -> R,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<FatalReport>() {
            Ok(report) => Err(*report),
            Err(other) => std::panic::resume_unwind(other),
        },
    }
}
