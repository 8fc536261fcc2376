//! Redis Pub/Sub for cross-instance L1 invalidation.
//!
//! ```text
//! Instance 1: cache.delete("key1")
//!   ↓
//! PUBLISH <channel> {"origin":"<instance-1>","kind":"key","key":"key1"}
//!   ↓
//! Instance 2: listener receives it → removes "key1" from its L1
//! Instance 1: listener skips its own message
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tiercache_store::GlobPattern;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::local::LocalStore;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// What a peer should drop from its local tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidationScope {
    Key { key: String },
    Pattern { pattern: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Instance that published the message.
    pub origin: Uuid,
    #[serde(flatten)]
    pub scope: InvalidationScope,
}

impl InvalidationMessage {
    pub fn key(origin: Uuid, key: &str) -> Self {
        Self {
            origin,
            scope: InvalidationScope::Key {
                key: key.to_string(),
            },
        }
    }

    pub fn pattern(origin: Uuid, pattern: &str) -> Self {
        Self {
            origin,
            scope: InvalidationScope::Pattern {
                pattern: pattern.to_string(),
            },
        }
    }
}

/// Subscribes to the invalidation channel and purges the local tier.
#[derive(Debug, Clone)]
pub struct InvalidationListener {
    redis_url: String,
    channel: String,
    instance_id: Uuid,
    local: LocalStore,
}

impl InvalidationListener {
    pub fn new(
        redis_url: impl Into<String>,
        channel: impl Into<String>,
        instance_id: Uuid,
        local: LocalStore,
    ) -> Self {
        Self {
            redis_url: redis_url.into(),
            channel: channel.into(),
            instance_id,
            local,
        }
    }

    /// Spawns the listener. It reconnects with exponential backoff until the
    /// returned handle is aborted.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                match self.run().await {
                    Ok(()) => backoff = INITIAL_BACKOFF,
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            channel = %self.channel,
                            backoff_secs = backoff.as_secs(),
                            "invalidation listener error, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self) -> Result<(), String> {
        use futures_util::StreamExt;

        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| format!("failed to create Redis client: {e}"))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        tracing::info!(channel = %self.channel, "subscribed to invalidation channel");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>() {
                Ok(payload) => self.handle_payload(&payload).await,
                Err(e) => tracing::warn!(error = %e, "non-text invalidation payload"),
            }
        }
        Err("pub/sub connection closed".to_string())
    }

    /// Applies one published message to the local tier.
    pub async fn handle_payload(&self, payload: &str) {
        let message: InvalidationMessage = match serde_json::from_str(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse invalidation message");
                return;
            }
        };
        if message.origin == self.instance_id {
            return;
        }

        match message.scope {
            InvalidationScope::Key { key } => {
                tracing::debug!(key = %key, "received key invalidation");
                self.local.remove(&key).await;
            }
            InvalidationScope::Pattern { pattern } => {
                let purged = self.local.purge_matching(&GlobPattern::new(&pattern)).await;
                tracing::debug!(pattern = %pattern, purged, "received pattern invalidation");
            }
        }
    }
}
