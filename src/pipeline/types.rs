//! Shared types for the event pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Channel identity ────────────────────────────────────────────────

/// Opaque handle for one monitored channel.
///
/// The configured string (a `@username` or a numeric chat id) is the
/// identity for the process lifetime; events carry the configured form, not
/// whatever alias the platform reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Whether the platform reported a fresh post or an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    New,
    Edited,
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Edited => "edited",
        }
    }
}

/// One observed post, consumed exactly once by its channel's worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Channel the post appeared in.
    pub channel: ChannelId,
    /// Platform-native message id.
    pub message_id: i64,
    /// Raw message text at observation time.
    pub text: String,
    /// Message timestamp as reported by the platform.
    pub received_at: DateTime<Utc>,
    /// New post or edit.
    pub kind: EventKind,
}

// ── Stage outcomes ──────────────────────────────────────────────────

/// Result of the enhancer stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhanceOutcome {
    /// The message was edited with custom-emoji references.
    Edited,
    /// No mapped glyph in the text; nothing to do.
    Unchanged,
    /// The platform rejected the edit. Expected, recoverable; the cleaner
    /// still runs.
    Failed,
}

impl EnhanceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Edited => "edited",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
        }
    }
}

/// Result of the cleaner stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanOutcome {
    /// A code was recorded (or a known duplicate needed no configured
    /// action); the message stays.
    NoAction,
    /// The message repeated an already-indexed code and was deleted.
    DuplicateRemoved,
    /// The message matched the delete rule (age or keyword) and was deleted.
    RuleRemoved,
    /// A duplicate was forwarded to the configured targets; deletion is
    /// disabled by configuration.
    Forwarded,
    /// No code extracted and no rule matched.
    Skipped,
}

impl CleanOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoAction => "no_action",
            Self::DuplicateRemoved => "duplicate_removed",
            Self::RuleRemoved => "rule_removed",
            Self::Forwarded => "forwarded",
            Self::Skipped => "skipped",
        }
    }
}

// ── Reports ─────────────────────────────────────────────────────────

/// Terminal record for one processed event. Every event produces exactly
/// one report; none are dropped.
#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub channel: ChannelId,
    pub message_id: i64,
    pub kind: EventKind,
    pub enhance: EnhanceOutcome,
    pub clean: CleanOutcome,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_display_and_eq() {
        let a = ChannelId::from("@shop");
        let b = ChannelId::new("@shop");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "@shop");
        assert_eq!(a.as_str(), "@shop");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(EnhanceOutcome::Edited.label(), "edited");
        assert_eq!(EnhanceOutcome::Unchanged.label(), "unchanged");
        assert_eq!(EnhanceOutcome::Failed.label(), "failed");
        assert_eq!(CleanOutcome::NoAction.label(), "no_action");
        assert_eq!(CleanOutcome::DuplicateRemoved.label(), "duplicate_removed");
        assert_eq!(CleanOutcome::RuleRemoved.label(), "rule_removed");
        assert_eq!(CleanOutcome::Forwarded.label(), "forwarded");
        assert_eq!(CleanOutcome::Skipped.label(), "skipped");
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = MessageEvent {
            channel: "@shop".into(),
            message_id: 42,
            text: "🛒 SKU-42 new item".into(),
            received_at: Utc::now(),
            kind: EventKind::New,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: MessageEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channel, event.channel);
        assert_eq!(back.message_id, 42);
        assert_eq!(back.kind, EventKind::New);
    }

    #[test]
    fn channel_id_serializes_transparent() {
        let json = serde_json::to_string(&ChannelId::from("@shop")).unwrap();
        assert_eq!(json, "\"@shop\"");
    }
}
