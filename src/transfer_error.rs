//! Typed transfer failures and the classifier that produces them.
//!
//! Every terminal failure of a run is surfaced as exactly one
//! [`TransferError`]. Its metadata (title, message, retry/critical flags)
//! is a fixed function of the variant.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error_codes;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TransferError {
    #[error("Storage quota exceeded on {provider}")]
    QuotaExceeded { provider: String },

    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Path traversal detected: '{path}'")]
    PathTraversal { path: String },

    #[error("Invalid path: '{path}'")]
    InvalidPath { path: String },

    #[error("Transfer failed: {message}")]
    Generic { message: String },
}

impl TransferError {
    pub fn title(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "Storage Full",
            Self::ConnectionTimeout => "Connection Error",
            Self::AuthenticationFailed => "Authentication Failed",
            Self::PathTraversal { .. } => "Path Blocked",
            Self::InvalidPath { .. } => "Invalid Path",
            Self::Generic { .. } => "Transfer Failed",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::QuotaExceeded { provider } => {
                format!("{provider} storage is full. Free up space or upgrade your storage plan.")
            }
            Self::ConnectionTimeout => {
                "Connection timed out. Check your internet connection and try again.".to_string()
            }
            Self::AuthenticationFailed => {
                "Cloud authentication failed. Your saved credentials were rejected.".to_string()
            }
            Self::PathTraversal { path } => {
                format!("The path '{path}' points outside its folder and was blocked.")
            }
            Self::InvalidPath { path } => {
                format!("The path '{path}' contains characters that are not allowed.")
            }
            Self::Generic { message } => message.clone(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "Free up space or upgrade your storage plan",
            Self::ConnectionTimeout => "Check your internet connection and try again",
            Self::AuthenticationFailed => "Check your credentials and re-authenticate",
            Self::PathTraversal { .. } => {
                "Path cannot contain '..' or attempt to escape directories"
            }
            Self::InvalidPath { .. } => "Use a valid file path without special characters",
            Self::Generic { .. } => "Check the logs for details and try again",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionTimeout)
    }

    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. }
                | Self::AuthenticationFailed
                | Self::PathTraversal { .. }
                | Self::InvalidPath { .. }
        )
    }

    /// Security rejections raised before any subprocess exists.
    pub fn is_security_rejection(&self) -> bool {
        matches!(self, Self::PathTraversal { .. } | Self::InvalidPath { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => error_codes::ERR_QUOTA_EXCEEDED,
            Self::ConnectionTimeout => error_codes::ERR_CONNECTION_TIMEOUT,
            Self::AuthenticationFailed => error_codes::ERR_AUTHENTICATION_FAILED,
            Self::PathTraversal { .. } => error_codes::ERR_PATH_TRAVERSAL,
            Self::InvalidPath { .. } => error_codes::ERR_INVALID_PATH,
            Self::Generic { .. } => error_codes::ERR_TRANSFER_FAILED,
        }
    }
}

/// Raw failure information captured from a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct FailureSignal {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub timed_out: bool,
    /// Body of the last ERROR line seen while the run streamed.
    pub last_error: Option<String>,
}

impl FailureSignal {
    pub fn from_exit(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            timed_out: false,
            last_error: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn with_last_error(mut self, line: Option<String>) -> Self {
        self.last_error = line.filter(|l| !l.trim().is_empty());
        self
    }
}

/// Maps a raw failure to one [`TransferError`] variant.
pub trait ErrorClassifier: Send + Sync {
    /// `provider` is the display name of the remote the run was writing to;
    /// it labels quota errors when the output does not name one.
    fn classify(&self, signal: &FailureSignal, provider: &str) -> TransferError;
}

static QUOTA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)quota|insufficient[_ ]storage|not enough (free )?space|no space left|storage (is )?full",
    )
    .expect("quota pattern compiles")
});

static AUTH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)authenticat\w* failed|unauthori[sz]ed|invalid[_ ](credentials|grant|access token)|token (has )?expired|couldn't fetch token|\b401\b|\b403 forbidden\b",
    )
    .expect("auth pattern compiles")
});

static TIMEOUT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)timed out|timeout|deadline exceeded|connection (refused|reset)|no such host|network is unreachable|host unreachable|temporary failure in name resolution",
    )
    .expect("timeout pattern compiles")
});

/// Leading `2024/01/31 10:00:00 ERROR : ` noise in rclone log lines.
static LOG_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}\s+)?(ERROR|NOTICE|INFO|DEBUG)\s*:\s*")
        .expect("prefix pattern compiles")
});

/// Pattern-based classifier over rclone's stderr text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn new() -> Self {
        Self
    }

    fn quota_provider(stderr: &str, fallback: &str) -> String {
        let lower = stderr.to_lowercase();
        if lower.contains("googleapi") || lower.contains("drive storage quota") {
            return "Google Drive".to_string();
        }
        if lower.contains("insufficient_storage") {
            return "Dropbox".to_string();
        }
        if fallback.is_empty() {
            "Cloud storage".to_string()
        } else {
            fallback.to_string()
        }
    }

    fn generic_message(signal: &FailureSignal) -> String {
        let is_summary = |l: &str| l.contains("Attempt ") && l.contains("failed with");
        if let Some(line) = signal.last_error.as_deref().map(str::trim) {
            if !is_summary(line) {
                return line.to_string();
            }
        }
        let last_error = signal
            .stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| !is_summary(l))
            .last()
            .map(|l| LOG_PREFIX.replace(l, "").trim().to_string());

        match (last_error, signal.exit_code) {
            (Some(line), _) if !line.is_empty() => line,
            (_, Some(code)) => format!("rclone exited with code {code}"),
            _ => "rclone terminated without an exit code".to_string(),
        }
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, signal: &FailureSignal, provider: &str) -> TransferError {
        if signal.timed_out {
            return TransferError::ConnectionTimeout;
        }

        let text = signal.stderr.as_str();
        if QUOTA_PATTERN.is_match(text) {
            return TransferError::QuotaExceeded {
                provider: Self::quota_provider(text, provider),
            };
        }
        if AUTH_PATTERN.is_match(text) {
            return TransferError::AuthenticationFailed;
        }
        if TIMEOUT_PATTERN.is_match(text) {
            return TransferError::ConnectionTimeout;
        }

        TransferError::Generic {
            message: Self::generic_message(signal),
        }
    }
}
