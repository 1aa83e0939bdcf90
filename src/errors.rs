//! Error types for the availability report

use chrono::{DateTime, Utc};
use std::fmt;

pub type Result<T> = std::result::Result<T, AvailError>;

#[derive(Debug)]
pub enum AvailError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request failed
    Http(reqwest::Error),

    /// JSON serialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Malformed line or timestamp
    Parse(String),

    /// Response field does not match what was queried
    FieldMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },

    /// Interval touches a day that is not in the day index
    OutOfWindow { day: DateTime<Utc> },

    /// Interval channel is not a column of the coverage matrix
    UnknownChannel(String),

    /// Web service answered with an unexpected status
    Service { status: u16, url: String },

    /// Generic error with message
    Other(String),
}

impl AvailError {
    /// Whether this error only invalidates a single channel aggregation
    pub fn is_channel_scoped(&self) -> bool {
        matches!(self, AvailError::OutOfWindow { .. })
    }
}

impl fmt::Display for AvailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailError::Io(err) => write!(f, "IO error: {}", err),
            AvailError::Http(err) => write!(f, "HTTP error: {}", err),
            AvailError::Json(err) => write!(f, "JSON error: {}", err),
            AvailError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AvailError::Parse(msg) => write!(f, "Parse error: {}", msg),
            AvailError::FieldMismatch { field, expected, found } => write!(
                f,
                "Response {} mismatch: expected '{}', found '{}'",
                field, expected, found
            ),
            AvailError::OutOfWindow { day } => write!(
                f,
                "Interval outside requested window: day {} is not indexed",
                day.format("%Y-%m-%d")
            ),
            AvailError::UnknownChannel(channel) => {
                write!(f, "Channel {} is not a coverage column", channel)
            }
            AvailError::Service { status, url } => {
                write!(f, "Service returned status {} for {}", status, url)
            }
            AvailError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for AvailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AvailError::Io(err) => Some(err),
            AvailError::Http(err) => Some(err),
            AvailError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AvailError {
    fn from(err: std::io::Error) -> Self {
        AvailError::Io(err)
    }
}

impl From<reqwest::Error> for AvailError {
    fn from(err: reqwest::Error) -> Self {
        AvailError::Http(err)
    }
}

impl From<serde_json::Error> for AvailError {
    fn from(err: serde_json::Error) -> Self {
        AvailError::Json(err)
    }
}
