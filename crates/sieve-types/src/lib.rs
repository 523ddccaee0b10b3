//! Shared types, errors, statuses, and settings for the sieve check runner.
//!
//! This crate provides the foundational types used across all other sieve crates:
//! - `SieveError` — unified error taxonomy
//! - `BotStatus` — classification of a single record
//! - `StepOutcome` — typed result of executing one script operation
//! - `ScriptSettings` / `RunSettings` — script-level and run-level configuration
//! - `CheckpointRecord` — resumable progress offset for a (script, wordlist) pair

pub mod settings;

pub use settings::{
    BrowserSettings, CustomInput, InputField, InputRule, RetryPolicy, RunSettings,
    ScriptSettings,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error type for all sieve subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SieveError {
    // === Compiler Errors ===
    #[error("Script compile error at line {line}: {message}")]
    Compile { line: usize, message: String },

    // === Transport Errors ===
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    TransportTimeout { url: String, timeout_ms: u64 },

    #[error("Could not connect through {proxy}: {message}")]
    ProxyUnreachable { proxy: String, message: String },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    // === Browser Errors ===
    #[error("Browser action '{action}' timed out after {timeout_ms}ms")]
    BrowserTimeout { action: String, timeout_ms: u64 },

    #[error("Browser action '{action}' failed: {message}")]
    Browser { action: String, message: String },

    // === Operation Errors ===
    #[error("Operation '{operation}' failed: {message}")]
    Operation { operation: String, message: String },

    #[error("{kind} selection failed: {message}")]
    Selection { kind: String, message: String },

    // === Input Errors ===
    #[error("Invalid proxy on line {line}: {message}")]
    InvalidProxy { line: usize, message: String },

    #[error("Invalid input rule for '{field}': {message}")]
    InvalidInputRule { field: String, message: String },

    // === Run Errors ===
    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SieveError {
    /// Returns `true` if the failure should mark the active proxy unhealthy.
    pub fn is_health_impacting(&self) -> bool {
        matches!(
            self,
            SieveError::TransportTimeout { .. }
                | SieveError::ProxyUnreachable { .. }
                | SieveError::BrowserTimeout { .. }
        )
    }

    /// Returns `true` if the error must abort startup instead of being
    /// recovered into a retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SieveError::Compile { .. }
                | SieveError::Config(_)
                | SieveError::InvalidProxy { .. }
                | SieveError::InvalidInputRule { .. }
        )
    }

    /// Shorthand for [`SieveError::Operation`].
    pub fn operation(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        SieveError::Operation {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// A convenience alias for `Result<T, SieveError>`.
pub type Result<T> = std::result::Result<T, SieveError>;

// ---------------------------------------------------------------------------
// BotStatus — classification of a record
// ---------------------------------------------------------------------------

/// Classification of one record. Parsing is case-insensitive; anything that
/// is not a built-in status becomes [`BotStatus::Custom`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BotStatus {
    #[default]
    None,
    Success,
    Failure,
    ToCheck,
    Retry,
    Ban,
    Error,
    Custom(String),
}

impl BotStatus {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "none" => BotStatus::None,
            "success" => BotStatus::Success,
            "failure" => BotStatus::Failure,
            "tocheck" => BotStatus::ToCheck,
            "retry" => BotStatus::Retry,
            "ban" => BotStatus::Ban,
            "error" => BotStatus::Error,
            _ => BotStatus::Custom(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BotStatus::None => "none",
            BotStatus::Success => "success",
            BotStatus::Failure => "failure",
            BotStatus::ToCheck => "toCheck",
            BotStatus::Retry => "retry",
            BotStatus::Ban => "ban",
            BotStatus::Error => "error",
            BotStatus::Custom(name) => name,
        }
    }

    /// Lower-cased name used for output routing (`tocheck.txt`, `success.txt`, ...).
    pub fn bucket(&self) -> String {
        self.as_str().to_lowercase()
    }

    /// Case-insensitive comparison, so `Custom("Free")` equals `Custom("FREE")`.
    pub fn same_as(&self, other: &BotStatus) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for BotStatus {
    fn from(value: String) -> Self {
        BotStatus::parse(&value)
    }
}

impl From<&str> for BotStatus {
    fn from(value: &str) -> Self {
        BotStatus::parse(value)
    }
}

impl From<BotStatus> for String {
    fn from(value: BotStatus) -> Self {
        value.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// StepOutcome — typed result of one operation
// ---------------------------------------------------------------------------

/// What the run loop should do after an operation finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The operation ran; the status is whatever the operation left behind.
    Completed,
    /// The operation failed; the attempt is classified `retry`.
    Retry { reason: String },
    /// The operation failed in a way that implicates the proxy; the proxy is
    /// flagged unhealthy and the attempt is classified `retry`.
    ProxyFault { reason: String },
}

impl StepOutcome {
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => StepOutcome::Completed,
            Err(e) if e.is_health_impacting() => StepOutcome::ProxyFault {
                reason: e.to_string(),
            },
            Err(e) => StepOutcome::Retry {
                reason: e.to_string(),
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed)
    }
}

// ---------------------------------------------------------------------------
// CheckpointRecord — resumable progress offset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub script_name: String,
    pub input_source: String,
    pub progress: u64,
    /// RFC 3339 timestamp of the last update.
    pub updated_at: String,
}

impl CheckpointRecord {
    pub fn new(script_name: impl Into<String>, input_source: impl Into<String>, progress: u64) -> Self {
        Self {
            script_name: script_name.into(),
            input_source: input_source.into(),
            progress,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Whether this record belongs to the given (script, source) pair.
    pub fn is_for(&self, script_name: &str, input_source: &str) -> bool {
        self.script_name == script_name && self.input_source == input_source
    }
}
