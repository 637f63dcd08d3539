//! Scoped call-stack sanitization
//!
//! Cooperative masking: while a sanitizer guard is live the thread is
//! flagged as operating under sanitization, and entry/exit timing is
//! perturbed so the wrapped operation does not form a stable timing
//! fingerprint. The restore side runs on every exit path — the guard's
//! drop fires during unwinding too, so a panicking wrapped closure still
//! leaves the thread in its prior state.

use super::timing;
use std::cell::Cell;

thread_local! {
    static SANITIZE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// whether the current thread is inside a sanitized scope
pub fn is_sanitized() -> bool {
    SANITIZE_DEPTH.with(|depth| depth.get() > 0)
}

/// current sanitization nesting depth for this thread
pub fn depth() -> u32 {
    SANITIZE_DEPTH.with(|depth| depth.get())
}

/// RAII call-stack sanitizer
///
/// applies on construction, restores on drop.
pub struct CallStackSanitizer {
    _private: (),
}

impl CallStackSanitizer {
    /// enter a sanitized scope on the current thread
    pub fn new() -> Self {
        SANITIZE_DEPTH.with(|depth| depth.set(depth.get() + 1));
        timing::jitter(true);
        Self { _private: () }
    }
}

impl Default for CallStackSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallStackSanitizer {
    fn drop(&mut self) {
        timing::jitter(true);
        SANITIZE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// run `f` inside a sanitized scope
///
/// restoration is guaranteed on all exit paths, including panics.
pub fn execute_sanitized<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = CallStackSanitizer::new();
    f()
}
