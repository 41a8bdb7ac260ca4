//! Enhancer pipeline — rewrites emoji and edits the message in place.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::emoji::{self, EmojiMap};
use crate::gateway::Gateway;
use crate::pipeline::types::{EnhanceOutcome, MessageEvent};

/// First pipeline stage. A rejected edit is an expected outcome, not an
/// error: the caller runs the cleaner next regardless.
pub struct EnhancerPipeline {
    gateway: Arc<dyn Gateway>,
}

impl EnhancerPipeline {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Rewrite mapped glyphs and apply the edit. No retry on failure —
    /// a later edit notification for the same message is the retry path.
    pub async fn run(&self, event: &MessageEvent, map: &EmojiMap) -> EnhanceOutcome {
        let rewritten = emoji::rewrite(&event.text, map);
        if !rewritten.changed {
            debug!(
                channel = %event.channel,
                message_id = event.message_id,
                "No mapped glyphs; leaving message untouched"
            );
            return EnhanceOutcome::Unchanged;
        }

        match self
            .gateway
            .edit_message(&event.channel, event.message_id, &rewritten.text)
            .await
        {
            Ok(()) => {
                info!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    replaced = rewritten.replaced,
                    "Enhanced message"
                );
                EnhanceOutcome::Edited
            }
            Err(e) => {
                warn!(
                    channel = %event.channel,
                    message_id = event.message_id,
                    kind = e.kind(),
                    error = %e,
                    "Edit rejected"
                );
                EnhanceOutcome::Failed
            }
        }
    }
}
