//! Platform gateway — the seam between the pipelines and the messaging
//! platform.

pub mod telegram;

pub use telegram::TelegramGateway;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::pipeline::types::ChannelId;

/// Platform actions the pipelines need.
///
/// Implementations classify failures into `GatewayError` variants; the
/// pipelines absorb every error into a stage outcome, so all calls must
/// have a bounded wait.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Replace a message's text in place (HTML parse mode).
    async fn edit_message(
        &self,
        channel: &ChannelId,
        message_id: i64,
        text: &str,
    ) -> Result<(), GatewayError>;

    /// Delete a message.
    async fn delete_message(
        &self,
        channel: &ChannelId,
        message_id: i64,
    ) -> Result<(), GatewayError>;

    /// Forward a message preserving attribution.
    async fn forward_message(
        &self,
        from: &ChannelId,
        to: &ChannelId,
        message_id: i64,
    ) -> Result<(), GatewayError>;

    /// Re-post a message without attribution.
    async fn copy_message(
        &self,
        from: &ChannelId,
        to: &ChannelId,
        message_id: i64,
    ) -> Result<(), GatewayError>;
}
