//! Cleaner pipeline — duplicate and stale-post removal.
//!
//! Order of decisions, short-circuiting at the first action taken:
//! 1. extract a code (first configured keyword that yields one wins);
//! 2. duplicate check against the index — first sighting is recorded, a
//!    re-sighting under a different message id is forwarded and deleted;
//! 3. the age/keyword delete rule;
//! 4. otherwise nothing.
//!
//! Deleting an already-deleted message is success, so re-running the
//! cleaner over an event it already acted on is a no-op.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::{CleanerConfig, ForwardMode};
use crate::error::IndexError;
use crate::gateway::Gateway;
use crate::pipeline::types::{ChannelId, CleanOutcome, MessageEvent};
use crate::store::{DuplicateIndex, IndexEntry, InsertOutcome};

// ── Code extraction ─────────────────────────────────────────────────

/// Compiled extractor for one keyword.
///
/// Three forms, tried in order: `keyword: value` (ASCII token),
/// `keyword: 127` (any Unicode digits), and `keyword-42` (token attached
/// directly to the keyword). The canonical code keeps the configured
/// keyword casing so case variants of the same post dedup together.
#[derive(Debug, Clone)]
struct CodeExtractor {
    keyword: String,
    colon: Regex,
    digits: Regex,
    attached: Regex,
}

impl CodeExtractor {
    fn compile(keyword: &str) -> Option<Self> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return None;
        }
        let escaped = regex::escape(keyword);
        let colon = Regex::new(&format!(r"(?i){escaped}\s*[:：]\s*([A-Za-z0-9_\-]+)")).ok()?;
        let digits = Regex::new(&format!(r"(?i){escaped}\s*[:：]\s*(\d+)")).ok()?;
        let attached = Regex::new(&format!(r"(?i){escaped}([A-Za-z0-9_\-]+)")).ok()?;
        Some(Self {
            keyword: keyword.to_string(),
            colon,
            digits,
            attached,
        })
    }

    fn extract(&self, text: &str) -> Option<String> {
        if let Some(c) = self.colon.captures(text) {
            return Some(format!("{}:{}", self.keyword, &c[1]));
        }
        if let Some(c) = self.digits.captures(text) {
            return Some(format!("{}:{}", self.keyword, &c[1]));
        }
        if let Some(c) = self.attached.captures(text) {
            return Some(format!("{}{}", self.keyword, &c[1]));
        }
        None
    }
}

// ── Compiled rules ──────────────────────────────────────────────────

/// Cleaner configuration compiled once per config snapshot.
pub struct CleanerRules {
    extractors: Vec<CodeExtractor>,
    delete_keywords: Vec<String>,
    max_age: Option<chrono::Duration>,
    forward_targets: Vec<ChannelId>,
    forward_mode: ForwardMode,
    delete_duplicates: bool,
    degraded_dedup: bool,
}

impl CleanerRules {
    pub fn compile(config: &CleanerConfig) -> Self {
        let extractors = config
            .keywords
            .iter()
            .filter_map(|kw| {
                let extractor = CodeExtractor::compile(kw);
                if extractor.is_none() {
                    warn!(keyword = %kw, "Ignoring unusable cleaner keyword");
                }
                extractor
            })
            .collect();

        let max_age = config.delete_rule.max_age_days.and_then(|days| {
            if days >= 0 {
                Some(chrono::Duration::days(days))
            } else {
                warn!(max_age_days = days, "Ignoring negative delete-rule age");
                None
            }
        });

        Self {
            extractors,
            delete_keywords: config
                .delete_rule
                .keywords
                .iter()
                .map(|kw| kw.to_lowercase())
                .filter(|kw| !kw.is_empty())
                .collect(),
            max_age,
            forward_targets: config
                .forward_targets
                .iter()
                .map(|t| ChannelId::new(t.clone()))
                .collect(),
            forward_mode: config.forward_mode,
            delete_duplicates: config.delete_duplicates,
            degraded_dedup: config.degraded_dedup,
        }
    }

    /// At most one code per message; the first keyword that yields a code
    /// wins. A keyword present in the text without an extractable code
    /// falls through to the next one.
    pub fn extract_code(&self, text: &str) -> Option<String> {
        self.extractors.iter().find_map(|ex| ex.extract(text))
    }

    fn delete_reason(&self, event: &MessageEvent) -> Option<String> {
        if let Some(max_age) = self.max_age {
            let age = Utc::now().signed_duration_since(event.received_at);
            if age > max_age {
                return Some(format!("older than {} day(s)", max_age.num_days()));
            }
        }
        let lowered = event.text.to_lowercase();
        self.delete_keywords
            .iter()
            .find(|kw| lowered.contains(kw.as_str()))
            .map(|kw| format!("delete keyword '{kw}'"))
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

/// What the duplicate check decided for an extracted code.
enum DedupDecision {
    /// Code was unknown; the entry for this event is now recorded.
    FirstSighting,
    /// The index already points at this exact message (an edit of the
    /// canonical post).
    CanonicalEdit,
    /// The index points at an earlier message; this event is a duplicate.
    Duplicate(IndexEntry),
    /// The index could not answer; no dedup action for this event.
    Unavailable,
}

/// Second pipeline stage. Always invoked after the enhancer, whatever its
/// outcome. All gateway and index failures are absorbed into outcomes.
pub struct CleanerPipeline {
    gateway: Arc<dyn Gateway>,
    index: Arc<dyn DuplicateIndex>,
}

impl CleanerPipeline {
    pub fn new(gateway: Arc<dyn Gateway>, index: Arc<dyn DuplicateIndex>) -> Self {
        Self { gateway, index }
    }

    pub async fn run(&self, event: &MessageEvent, rules: &CleanerRules) -> CleanOutcome {
        match rules.extract_code(&event.text) {
            Some(code) => match self.check_duplicate(event, &code, rules).await {
                DedupDecision::Duplicate(entry) => {
                    self.remove_duplicate(event, &code, &entry, rules).await
                }
                DedupDecision::FirstSighting => {
                    debug!(
                        channel = %event.channel,
                        message_id = event.message_id,
                        code = %code,
                        "Recorded first occurrence"
                    );
                    self.apply_delete_rule(event, rules, CleanOutcome::NoAction)
                        .await
                }
                DedupDecision::CanonicalEdit => {
                    self.apply_delete_rule(event, rules, CleanOutcome::NoAction)
                        .await
                }
                DedupDecision::Unavailable => {
                    self.apply_delete_rule(event, rules, CleanOutcome::Skipped)
                        .await
                }
            },
            None => {
                self.apply_delete_rule(event, rules, CleanOutcome::Skipped)
                    .await
            }
        }
    }

    async fn check_duplicate(
        &self,
        event: &MessageEvent,
        code: &str,
        rules: &CleanerRules,
    ) -> DedupDecision {
        let existing = match self.index.lookup(&event.channel, code).await {
            Ok(existing) => existing,
            Err(e) => return index_unavailable(event, code, rules, &e),
        };

        match existing {
            Some(entry) if entry.message_id != event.message_id => {
                DedupDecision::Duplicate(entry)
            }
            Some(_) => DedupDecision::CanonicalEdit,
            None => {
                match self
                    .index
                    .insert(&event.channel, code, event.message_id, Utc::now())
                    .await
                {
                    Ok(InsertOutcome::Inserted) => DedupDecision::FirstSighting,
                    // Lost a race with another writer; re-read to decide.
                    Ok(InsertOutcome::AlreadyPresent) => {
                        match self.index.lookup(&event.channel, code).await {
                            Ok(Some(entry)) if entry.message_id != event.message_id => {
                                DedupDecision::Duplicate(entry)
                            }
                            Ok(Some(_)) => DedupDecision::CanonicalEdit,
                            Ok(None) => DedupDecision::Unavailable,
                            Err(e) => index_unavailable(event, code, rules, &e),
                        }
                    }
                    Err(e) => index_unavailable(event, code, rules, &e),
                }
            }
        }
    }

    async fn remove_duplicate(
        &self,
        event: &MessageEvent,
        code: &str,
        entry: &IndexEntry,
        rules: &CleanerRules,
    ) -> CleanOutcome {
        let mut forwarded = 0usize;
        for target in &rules.forward_targets {
            let result = match rules.forward_mode {
                ForwardMode::Forward => {
                    self.gateway
                        .forward_message(&event.channel, target, event.message_id)
                        .await
                }
                ForwardMode::Copy => {
                    self.gateway
                        .copy_message(&event.channel, target, event.message_id)
                        .await
                }
            };
            match result {
                Ok(()) => forwarded += 1,
                Err(e) => warn!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    target = %target,
                    kind = e.kind(),
                    error = %e,
                    "Forward failed; continuing with remaining targets"
                ),
            }
        }

        if !rules.delete_duplicates {
            return if forwarded > 0 {
                info!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    code = %code,
                    kept = entry.message_id,
                    forwarded,
                    "Duplicate forwarded; deletion disabled"
                );
                CleanOutcome::Forwarded
            } else {
                info!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    code = %code,
                    kept = entry.message_id,
                    "Duplicate detected; no action configured"
                );
                CleanOutcome::NoAction
            };
        }

        match self
            .gateway
            .delete_message(&event.channel, event.message_id)
            .await
        {
            Ok(()) => {
                info!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    code = %code,
                    kept = entry.message_id,
                    "Removed duplicate"
                );
                CleanOutcome::DuplicateRemoved
            }
            Err(e) if e.is_not_found() => {
                debug!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    "Duplicate already gone"
                );
                CleanOutcome::DuplicateRemoved
            }
            Err(e) => {
                warn!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    kind = e.kind(),
                    error = %e,
                    "Duplicate delete failed; abandoned until the next event"
                );
                if forwarded > 0 {
                    CleanOutcome::Forwarded
                } else {
                    CleanOutcome::Skipped
                }
            }
        }
    }

    async fn apply_delete_rule(
        &self,
        event: &MessageEvent,
        rules: &CleanerRules,
        fallback: CleanOutcome,
    ) -> CleanOutcome {
        let Some(reason) = rules.delete_reason(event) else {
            return fallback;
        };

        match self
            .gateway
            .delete_message(&event.channel, event.message_id)
            .await
        {
            Ok(()) => {
                info!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    reason = %reason,
                    "Removed message by rule"
                );
                CleanOutcome::RuleRemoved
            }
            Err(e) if e.is_not_found() => {
                debug!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    "Rule-matched message already gone"
                );
                CleanOutcome::RuleRemoved
            }
            Err(e) => {
                warn!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    kind = e.kind(),
                    error = %e,
                    "Rule delete failed; abandoned until the next event"
                );
                fallback
            }
        }
    }
}

fn index_unavailable(
    event: &MessageEvent,
    code: &str,
    rules: &CleanerRules,
    e: &IndexError,
) -> DedupDecision {
    if rules.degraded_dedup {
        warn!(
            channel = %event.channel,
            message_id = event.message_id,
            code = %code,
            error = %e,
            "Index unavailable; degraded mode treats code as unseen"
        );
    } else {
        error!(
            channel = %event.channel,
            message_id = event.message_id,
            code = %code,
            error = %e,
            "Index unavailable; duplicate check skipped"
        );
    }
    DedupDecision::Unavailable
}

// ── Tests ───────────────────────────────────────────────────────────
