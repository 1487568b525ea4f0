//! Logging for binaries that run inside the sandbox.
//!
//! Stdout carries the result document, so every line goes to stderr as
//! `<utc millis> <LEVEL> <tag>: <message>`.

/// Tag of every line the in-sandbox supervisor logs.
pub const SUPERVISOR_TAG: &str = "box:supervisor";

/// UTC wall clock, RFC 3339 with millisecond precision.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[doc(hidden)]
pub fn line(level: &str, tag: &str, message: std::fmt::Arguments<'_>) -> String {
    format!("{} {level:<5} {tag}: {message}", timestamp())
}

/// Whether `line` has the shape [`line`] produces for `tag`.
pub fn is_tagged(line: &str, tag: &str) -> bool {
    let Some((ts, rest)) = line.split_once(' ') else {
        return false;
    };
    let Some((level, rest)) = rest.split_once(' ') else {
        return false;
    };
    matches!(level, "INFO" | "WARN" | "ERROR")
        && chrono::DateTime::parse_from_rfc3339(ts).is_ok()
        && rest
            .trim_start()
            .strip_prefix(tag)
            .is_some_and(|message| message.starts_with(": "))
}

#[macro_export]
macro_rules! log_info {
    ($tag:expr, $($arg:tt)*) => {
        eprintln!("{}", $crate::log::line("INFO", $tag, format_args!($($arg)*)))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($tag:expr, $($arg:tt)*) => {
        eprintln!("{}", $crate::log::line("WARN", $tag, format_args!($($arg)*)))
    };
}

#[macro_export]
macro_rules! log_error {
    ($tag:expr, $($arg:tt)*) => {
        eprintln!("{}", $crate::log::line("ERROR", $tag, format_args!($($arg)*)))
    };
}
