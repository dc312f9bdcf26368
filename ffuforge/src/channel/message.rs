//! Build messages exchanged between worker and controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a build message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Debug,
    Info,
    /// Carries a [`ProgressPayload`].
    Progress,
    Success,
    Warning,
    Error,
    Critical,
}

impl MessageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageLevel::Debug => "debug",
            MessageLevel::Info => "info",
            MessageLevel::Progress => "progress",
            MessageLevel::Success => "success",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
            MessageLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPayload {
    /// 0..=100, non-decreasing over a build.
    pub percent: u8,
    pub operation: String,
}

/// One immutable entry in the build channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMessage {
    pub timestamp: DateTime<Utc>,
    pub level: MessageLevel,
    pub message: String,
    /// Emitting component (orchestrator, cleanup, provider, ...).
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ProgressPayload>,
}

impl BuildMessage {
    pub fn new(level: MessageLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: source.into(),
            payload: None,
        }
    }

    pub fn progress(source: impl Into<String>, percent: u8, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        Self {
            timestamp: Utc::now(),
            level: MessageLevel::Progress,
            message: format!("{}% {}", percent.min(100), operation),
            source: source.into(),
            payload: Some(ProgressPayload {
                percent: percent.min(100),
                operation,
            }),
        }
    }

    pub fn percent(&self) -> Option<u8> {
        self.payload.as_ref().map(|p| p.percent)
    }
}

impl fmt::Display for BuildMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:>8}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.source,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_clamps_percent() {
        let msg = BuildMessage::progress("orchestrator", 140, "Packaging");
        assert_eq!(msg.percent(), Some(100));
        assert_eq!(msg.level, MessageLevel::Progress);
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(MessageLevel::Debug < MessageLevel::Warning);
        assert!(MessageLevel::Error < MessageLevel::Critical);
    }

    #[test]
    fn test_json_shape() {
        let msg = BuildMessage::new(MessageLevel::Warning, "cleanup", "share left behind");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["level"], "warning");
        assert!(json.get("payload").is_none());
    }
}
