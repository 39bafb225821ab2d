//! Developer-mode Logging
//!
//! The engine never surfaces expected failures as errors to the page author.
//! Instead it degrades (missing text, missing attribute, stale row) and
//! emits a diagnostic. Those diagnostics are only useful while developing,
//! so every macro here is a no-op unless the process-wide dev-mode flag is
//! enabled.
//!
//! The macros forward to `tracing`, so structured fields work as usual:
//!
//! ```rust,ignore
//! use crate::dev_warn;
//!
//! dev_warn!(expression = %source, "expression failed: {}", err);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

#[doc(hidden)]
pub use tracing;

static DEV_MODE: AtomicBool = AtomicBool::new(false);

/// Enable or disable developer diagnostics for the whole process.
pub fn set_dev_mode(enabled: bool) {
    DEV_MODE.store(enabled, Ordering::Relaxed);
}

/// Whether developer diagnostics are enabled.
pub fn dev_mode() -> bool {
    DEV_MODE.load(Ordering::Relaxed)
}

/// Emit a `tracing::warn!` event when dev mode is on.
#[macro_export]
macro_rules! dev_warn {
    ($($arg:tt)*) => {
        if $crate::log::dev_mode() {
            $crate::log::tracing::warn!($($arg)*);
        }
    };
}

/// Emit a `tracing::error!` event when dev mode is on.
#[macro_export]
macro_rules! dev_error {
    ($($arg:tt)*) => {
        if $crate::log::dev_mode() {
            $crate::log::tracing::error!($($arg)*);
        }
    };
}

/// Emit a `tracing::info!` event when dev mode is on.
#[macro_export]
macro_rules! dev_info {
    ($($arg:tt)*) => {
        if $crate::log::dev_mode() {
            $crate::log::tracing::info!($($arg)*);
        }
    };
}

/// Emit a `tracing::debug!` event when dev mode is on.
#[macro_export]
macro_rules! dev_debug {
    ($($arg:tt)*) => {
        if $crate::log::dev_mode() {
            $crate::log::tracing::debug!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_expand_in_both_modes() {
        // Engine tests flip the flag concurrently; only exercise expansion.
        set_dev_mode(true);
        dev_warn!("visible only in dev mode");

        set_dev_mode(false);
        dev_error!(code = 7, "suppressed");
    }
}
