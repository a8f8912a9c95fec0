//! Structured Logging for the Flyover BTC Engine
//!
//! Thin layer over `tracing`:
//! - JSON output on mainnet, pretty output elsewhere
//! - Correlation IDs for following one bridge operation across calls
//! - Event helpers for wallet movements, node failures and derivations
//!
//! # Usage
//!
//! ```rust,ignore
//! use flyover_btc::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true)?;
//! tracing::info!(target: "flyover::wallet", txid = %txid, "Broadcast payment");
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Wallet movements and bootstrap
    Wallet,
    /// Flyover address derivation
    Federation,
    /// SPV proof construction
    Proof,
    /// Bitcoin node calls
    Rpc,
    /// Startup and shutdown
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for failure events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_filter().to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

// ============================================================================
// Event Helpers
// ============================================================================

/// Log a wallet movement or bootstrap step
pub fn log_wallet_event(
    event_type: &str,
    wallet: &str,
    txid: Option<&str>,
    amount_sats: Option<u64>,
    error: Option<&str>,
) {
    let success = error.is_none();
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::Wallet, event_type).with_data(
        serde_json::json!({
            "wallet": wallet,
            "txid": txid,
            "amount_sats": amount_sats,
            "success": success
        }),
    );

    if let Some(err) = error {
        event = event.with_error("WALLET_ERROR", err);
    }

    if success {
        tracing::info!(target: "flyover::wallet", "{}", event.to_json());
    } else {
        tracing::error!(target: "flyover::wallet", "{}", event.to_json());
    }
}

/// Log a failed node call
pub fn log_rpc_failure(context: &str, error: &str, correlation_id: Option<&str>) {
    let mut event = LogEvent::new(LogLevel::Warn, EventCategory::Rpc, context)
        .with_error("NODE_RPC_FAILURE", error);

    if let Some(id) = correlation_id {
        event = event.with_correlation_id(id);
    }

    tracing::warn!(target: "flyover::rpc", "{}", event.to_json());
}

/// Log a derived flyover address
pub fn log_derivation_event(address: &str, quote_hash: &str, correlation_id: Option<&str>) {
    let mut event = LogEvent::new(
        LogLevel::Info,
        EventCategory::Federation,
        "flyover_address_derived",
    )
    .with_data(serde_json::json!({
        "address": address,
        "quote_hash": quote_hash
    }));

    if let Some(id) = correlation_id {
        event = event.with_correlation_id(id);
    }

    tracing::info!(target: "flyover::federation", "{}", event.to_json());
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.as_filter();
        EnvFilter::new(format!("flyover={},flyover_btc={},reqwest=warn", level, level))
    });

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from FlyoverConfig
pub fn init_from_config(config: &crate::config::FlyoverConfig) -> Result<(), LoggingError> {
    let level = LogLevel::from(config.log_level.as_str());
    let json_format = config.network == bitcoin::Network::Bitcoin;

    init_logging(level, json_format)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Generate a correlation ID for one bridge operation
pub fn generate_correlation_id() -> String {
    let timestamp = chrono::Utc::now().timestamp_millis() as u64;
    format!("{:x}-{:08x}", timestamp & 0xFFFF_FFFF, rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::Wallet, "payment_sent")
            .with_correlation_id("op-123")
            .with_data(serde_json::json!({"txid": "ab"}));

        let json = event.to_json();
        assert!(json.contains("payment_sent"));
        assert!(json.contains("op-123"));
        assert!(json.contains("\"category\":\"wallet\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_log_event_with_error() {
        let event = LogEvent::new(LogLevel::Warn, EventCategory::Rpc, "getblock")
            .with_error("NODE_RPC_FAILURE", "timeout");

        let json = event.to_json();
        assert!(json.contains("NODE_RPC_FAILURE"));
        assert!(json.contains("\"level\":\"WARN\""));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_correlation_id_format() {
        let id = generate_correlation_id();
        let parts: Vec<&str> = id.split('-').collect();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].len(), 8);
    }
}
