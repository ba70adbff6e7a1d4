use std::time::Instant;

use crate::config::LogFormat;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level and format.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let Some(filter) = env_filter_for_level(log_level) else {
        return;
    };

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .init(),
    }
}

fn env_filter_for_level(log_level: &str) -> Option<EnvFilter> {
    let level = log_level.to_uppercase();
    if level == "DISABLED" {
        return None;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    Some(EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO")))
}

/// Log the outcome of one relayed chat stream.
pub fn log_stream_complete(
    request_id: &uuid::Uuid,
    events: u64,
    errored: bool,
    client_gone: bool,
    start_time: Instant,
) {
    let elapsed_ms = start_time.elapsed().as_millis();
    if client_gone {
        tracing::info!(
            %request_id,
            events,
            elapsed_ms,
            "client disconnected, upstream stream released"
        );
    } else if errored {
        tracing::warn!(
            %request_id,
            events,
            elapsed_ms,
            "relay stream closed after error event"
        );
    } else {
        tracing::info!(%request_id, events, elapsed_ms, "relay stream completed");
    }
}

#[cfg(test)]
mod tests {
    use super::env_filter_for_level;

    #[test]
    fn test_disabled_installs_nothing() {
        assert!(env_filter_for_level("disabled").is_none());
    }

    #[test]
    fn test_python_style_levels_map() {
        assert!(env_filter_for_level("WARNING").is_some());
        assert!(env_filter_for_level("critical").is_some());
        assert!(env_filter_for_level("debug").is_some());
    }
}
