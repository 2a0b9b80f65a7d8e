#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut lines = lock!(self.lines);
///  lines.push(line);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for emitting a diagnostic line through a [`crate::instrument::Logger`]
///
/// ```rust, ignore
///  diag!(self.logger, "Excluded class={}", name);
/// ```
macro_rules! diag {
    ($logger:expr, $($arg:tt)*) => {
        $logger.line(&format!($($arg)*))
    };
}
