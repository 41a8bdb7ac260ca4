//! Test support: a recording gateway with per-channel concurrency tracking.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use telkeep::error::GatewayError;
use telkeep::gateway::Gateway;
use telkeep::pipeline::types::ChannelId;

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Edit {
        channel: String,
        message_id: i64,
        text: String,
    },
    Delete {
        channel: String,
        message_id: i64,
    },
    Forward {
        from: String,
        to: String,
        message_id: i64,
    },
}

#[derive(Default)]
struct Concurrency {
    active: HashMap<String, usize>,
    max_active: HashMap<String, usize>,
}

/// Gateway double that records calls, injects latency to widen race
/// windows, and tracks how many calls ran concurrently per channel.
pub struct TestGateway {
    calls: Mutex<Vec<Call>>,
    concurrency: Mutex<Concurrency>,
    latency: Duration,
    stall: Option<(String, Duration)>,
    fail_edits: bool,
}

impl TestGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            concurrency: Mutex::new(Concurrency::default()),
            latency: Duration::ZERO,
            stall: None,
            fail_edits: false,
        }
    }

    /// Every call sleeps this long between enter and exit.
    pub fn with_latency(ms: u64) -> Self {
        Self {
            latency: Duration::from_millis(ms),
            ..Self::new()
        }
    }

    /// Every edit is rejected (classified `other`).
    pub fn failing_edits() -> Self {
        Self {
            fail_edits: true,
            ..Self::new()
        }
    }

    /// Calls touching one channel take much longer than the rest.
    pub fn stalling_channel(channel: &str, ms: u64) -> Self {
        Self {
            stall: Some((channel.to_string(), Duration::from_millis(ms))),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of calls observed in flight at once for a channel.
    pub fn max_concurrent(&self, channel: &str) -> usize {
        self.concurrency
            .lock()
            .unwrap()
            .max_active
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn enter(&self, channel: &str) {
        let mut state = self.concurrency.lock().unwrap();
        let active = state.active.entry(channel.to_string()).or_insert(0);
        *active += 1;
        let now = *active;
        let max = state.max_active.entry(channel.to_string()).or_insert(0);
        if now > *max {
            *max = now;
        }
    }

    fn exit(&self, channel: &str) {
        let mut state = self.concurrency.lock().unwrap();
        if let Some(active) = state.active.get_mut(channel) {
            *active -= 1;
        }
    }

    async fn observe(&self, channel: &str) {
        self.enter(channel);
        let mut wait = self.latency;
        if let Some((stalled, extra)) = &self.stall {
            if stalled == channel {
                wait += *extra;
            }
        }
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.exit(channel);
    }
}

#[async_trait]
impl Gateway for TestGateway {
    async fn edit_message(
        &self,
        channel: &ChannelId,
        message_id: i64,
        text: &str,
    ) -> Result<(), GatewayError> {
        self.record(Call::Edit {
            channel: channel.to_string(),
            message_id,
            text: text.to_string(),
        });
        self.observe(channel.as_str()).await;
        if self.fail_edits {
            return Err(GatewayError::Other("edit rejected".into()));
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: &ChannelId,
        message_id: i64,
    ) -> Result<(), GatewayError> {
        self.record(Call::Delete {
            channel: channel.to_string(),
            message_id,
        });
        self.observe(channel.as_str()).await;
        Ok(())
    }

    async fn forward_message(
        &self,
        from: &ChannelId,
        to: &ChannelId,
        message_id: i64,
    ) -> Result<(), GatewayError> {
        self.record(Call::Forward {
            from: from.to_string(),
            to: to.to_string(),
            message_id,
        });
        self.observe(from.as_str()).await;
        Ok(())
    }

    async fn copy_message(
        &self,
        from: &ChannelId,
        to: &ChannelId,
        message_id: i64,
    ) -> Result<(), GatewayError> {
        self.record(Call::Forward {
            from: from.to_string(),
            to: to.to_string(),
            message_id,
        });
        self.observe(from.as_str()).await;
        Ok(())
    }
}
