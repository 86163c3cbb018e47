//! Structured logging bootstrap, gated by environment variables (§1.1, §4.8). Grounded on the donor's
//! `prax-query/src/logging.rs` `PRAX_DEBUG`/`PRAX_LOG_LEVEL`/`PRAX_LOG_FORMAT` triple, renamed to the
//! `QUERYGATE_*` prefix. Per-statement SQL debug events additionally honor
//! [`crate::config::GatewayConfig::is_late_configured`] (§4.8): once a data source's config has been
//! loaded, `debug!(sql = …)` events are suppressed regardless of the env filter, so a production reload
//! can't accidentally start leaking parameter values into logs.

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("QUERYGATE_DEBUG").map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes")).unwrap_or(false)
}

pub fn get_log_level() -> &'static str {
    if let Ok(level) = env::var("QUERYGATE_LOG_LEVEL") {
        match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => if is_debug_enabled() { "debug" } else { "warn" },
        }
    } else if is_debug_enabled() {
        "debug"
    } else {
        "warn"
    }
}

pub fn get_log_format() -> &'static str {
    env::var("QUERYGATE_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Initialize logging once. A no-op unless `QUERYGATE_DEBUG` or `QUERYGATE_LOG_LEVEL` is set, matching
/// the donor's opt-in bootstrap rather than always installing a subscriber.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var("QUERYGATE_LOG_LEVEL").is_err() {
            return;
        }

        #[cfg(feature = "tracing-init")]
        {
            use tracing_subscriber::{fmt, prelude::*, EnvFilter};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!("querygate={level}"))
                .unwrap_or_else(|_| EnvFilter::new("warn"));

            match get_log_format() {
                "json" => {
                    tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
                }
                "compact" => {
                    tracing_subscriber::registry().with(filter).with(fmt::layer().compact()).init();
                }
                _ => {
                    tracing_subscriber::registry().with(filter).with(fmt::layer().pretty()).init();
                }
            }

            tracing::info!(level = level, format = get_log_format(), "querygate logging initialized");
        }
    });
}

/// Whether a per-statement SQL debug event should fire: debug logging is enabled AND the config has not
/// moved past its bootstrap defaults (§4.8).
pub fn should_emit_sql_debug(is_late_configured: bool) -> bool {
    is_debug_enabled() && !is_late_configured
}

#[macro_export]
macro_rules! querygate_debug {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::debug!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_disabled_by_default() {
        // SAFETY: test process, no concurrent readers of this var.
        unsafe {
            env::remove_var("QUERYGATE_DEBUG");
        }
        assert!(!is_debug_enabled());
    }

    #[test]
    fn sql_debug_suppressed_once_late_configured() {
        // SAFETY: test process, no concurrent readers of this var.
        unsafe {
            env::set_var("QUERYGATE_DEBUG", "true");
        }
        assert!(should_emit_sql_debug(false));
        assert!(!should_emit_sql_debug(true));
        // SAFETY: test process, no concurrent readers of this var.
        unsafe {
            env::remove_var("QUERYGATE_DEBUG");
        }
    }
}
