//! Unified logging support
//!
//! These macros route to the `log` facade when the `log` feature of this
//! crate is enabled. With the feature off they expand to a `format_args!`
//! that is discarded, so arguments are still type-checked and never trigger
//! unused-variable warnings at the call site.

/// Unified trace-level logging
#[cfg(feature = "log")]
#[macro_export]
macro_rules! nos_trace {
    ($($arg:tt)*) => { $crate::__log::trace!($($arg)*) };
}

/// Unified trace-level logging
#[cfg(not(feature = "log"))]
#[macro_export]
macro_rules! nos_trace {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

/// Unified debug-level logging
#[cfg(feature = "log")]
#[macro_export]
macro_rules! nos_debug {
    ($($arg:tt)*) => { $crate::__log::debug!($($arg)*) };
}

/// Unified debug-level logging
#[cfg(not(feature = "log"))]
#[macro_export]
macro_rules! nos_debug {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

/// Unified info-level logging
#[cfg(feature = "log")]
#[macro_export]
macro_rules! nos_info {
    ($($arg:tt)*) => { $crate::__log::info!($($arg)*) };
}

/// Unified info-level logging
#[cfg(not(feature = "log"))]
#[macro_export]
macro_rules! nos_info {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

/// Unified warn-level logging
#[cfg(feature = "log")]
#[macro_export]
macro_rules! nos_warn {
    ($($arg:tt)*) => { $crate::__log::warn!($($arg)*) };
}

/// Unified warn-level logging
#[cfg(not(feature = "log"))]
#[macro_export]
macro_rules! nos_warn {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

/// Unified error-level logging
#[cfg(feature = "log")]
#[macro_export]
macro_rules! nos_error {
    ($($arg:tt)*) => { $crate::__log::error!($($arg)*) };
}

/// Unified error-level logging
#[cfg(not(feature = "log"))]
#[macro_export]
macro_rules! nos_error {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_expand_in_statement_position() {
        let frames = 4;
        nos_trace!("trace {}", frames);
        nos_debug!("debug {}", frames);
        nos_info!("info {frames}");
        nos_warn!("warn");
        nos_error!("error {}", frames + 1);
    }
}
