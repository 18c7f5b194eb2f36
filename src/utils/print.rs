//! Logging macros prefixing every line with the process identity.

use std::sync::OnceLock;

use env_logger::Env;

/// Process identity string used as logging prefix, e.g. `"b"` for the
/// benchmark client. Lines logged before it is set carry `-`.
pub static ME: OnceLock<String> = OnceLock::new();

/// Logs at the named `log::Level` variant with the `(ME)` prefix. Backs
/// the `pf_*` macros.
#[doc(hidden)]
#[macro_export]
macro_rules! pf_log {
    ($level:ident, $($fmt_args:tt)*) => {
        log::log!(
            log::Level::$level,
            "({}) {}",
            $crate::ME.get().map_or("-", |me| me.as_str()),
            format_args!($($fmt_args)*)
        )
    };
}

/// Logs a TRACE line; used for per-request chatter.
#[macro_export]
macro_rules! pf_trace {
    ($($fmt_args:tt)*) => { $crate::pf_log!(Trace, $($fmt_args)*) };
}

/// Logs a DEBUG line.
#[macro_export]
macro_rules! pf_debug {
    ($($fmt_args:tt)*) => { $crate::pf_log!(Debug, $($fmt_args)*) };
}

/// Logs an INFO line.
#[macro_export]
macro_rules! pf_info {
    ($($fmt_args:tt)*) => { $crate::pf_log!(Info, $($fmt_args)*) };
}

/// Logs a WARN line.
#[macro_export]
macro_rules! pf_warn {
    ($($fmt_args:tt)*) => { $crate::pf_log!(Warn, $($fmt_args)*) };
}

/// Logs an ERROR line.
#[macro_export]
macro_rules! pf_error {
    ($($fmt_args:tt)*) => { $crate::pf_log!(Error, $($fmt_args)*) };
}

/// Initializes `env_logger` once, defaulting to INFO unless `RUST_LOG`
/// says otherwise.
pub fn logger_init() {
    let _ =
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init();
}

/// Logs an ERROR line and evaluates to `Err(BenchError)` carrying the same
/// message.
#[macro_export]
macro_rules! logged_err {
    ($($fmt_args:tt)*) => {{
        let msg = format!($($fmt_args)*);
        $crate::pf_error!("{}", msg);
        Err($crate::BenchError::msg(msg))
    }};
}
