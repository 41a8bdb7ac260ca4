//! Backend-agnostic `DuplicateIndex` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IndexError;
use crate::pipeline::types::ChannelId;

/// First-occurrence record for a (channel, code) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub channel: ChannelId,
    pub code: String,
    /// Message id of the canonical (first-seen) post.
    pub message_id: i64,
    pub first_seen_at: DateTime<Utc>,
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An entry for this (channel, code) already exists and was kept.
    AlreadyPresent,
}

/// Keyed store of first-seen codes, partitioned by channel.
///
/// Insert is conditional: the stored entry is never overwritten
/// (first-write-wins), enforced inside the store so the invariant holds
/// for any number of consumers.
#[async_trait]
pub trait DuplicateIndex: Send + Sync {
    /// Find the first-occurrence entry for (channel, code), if any.
    async fn lookup(
        &self,
        channel: &ChannelId,
        code: &str,
    ) -> Result<Option<IndexEntry>, IndexError>;

    /// Record the first occurrence of (channel, code). Returns
    /// `AlreadyPresent` without modifying the stored entry when the pair
    /// is already known.
    async fn insert(
        &self,
        channel: &ChannelId,
        code: &str,
        message_id: i64,
        first_seen_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, IndexError>;

    /// Operator wipe: one channel, or everything. Returns the number of
    /// entries removed. Never called by the automatic pipeline.
    async fn reset(&self, channel: Option<&ChannelId>) -> Result<usize, IndexError>;
}
