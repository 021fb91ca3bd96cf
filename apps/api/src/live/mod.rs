//! Change notifications behind the live snapshot streams.
//!
//! Writers publish a [`ResumeChanged`] after every successful write. Subscribers
//! re-read the affected document and push a full snapshot; nothing is merged
//! incrementally. With Redis configured, notifications travel over a pub/sub
//! channel so every instance sees writes made by every other instance.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::resume::Resume;

const CHANNEL: &str = "reviewdesk:resume-changes";
const LOCAL_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeChanged {
    pub resume_id: Uuid,
    pub student_id: Uuid,
    pub shared_with_ids: Vec<Uuid>,
    pub deleted: bool,
}

impl ResumeChanged {
    pub fn updated(resume: &Resume) -> Self {
        Self {
            resume_id: resume.id,
            student_id: resume.student_id,
            shared_with_ids: resume.shared_with_ids.clone(),
            deleted: false,
        }
    }

    pub fn deleted(resume: &Resume) -> Self {
        Self {
            deleted: true,
            ..Self::updated(resume)
        }
    }

    /// Whether a dashboard belonging to `user_id` may need a refresh.
    pub fn concerns(&self, user_id: Uuid) -> bool {
        self.student_id == user_id || self.shared_with_ids.contains(&user_id)
    }
}

/// Redis client plus the one publishing connection shared by every writer.
struct RedisLink {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisLink {
    /// Connects on first use. A connection that failed is dropped and
    /// re-established by the next publish.
    async fn publish(&self, event: &ResumeChanged) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = {
            let mut slot = self.conn.lock().await;
            match slot.as_ref() {
                Some(conn) => conn.clone(),
                None => {
                    let conn = self.client.get_multiplexed_async_connection().await?;
                    debug!("Opened Redis publishing connection");
                    *slot = Some(conn.clone());
                    conn
                }
            }
        };
        if let Err(e) = conn.publish::<_, _, ()>(CHANNEL, payload).await {
            self.conn.lock().await.take();
            return Err(e.into());
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct LiveHub {
    local: broadcast::Sender<ResumeChanged>,
    redis: Option<Arc<RedisLink>>,
}

impl LiveHub {
    /// A hub that only reaches subscribers of this process.
    pub fn local() -> Self {
        let (local, _) = broadcast::channel(LOCAL_CAPACITY);
        Self { local, redis: None }
    }

    /// A hub that publishes through Redis. Call [`LiveHub::spawn_bridge`] to receive.
    pub fn with_redis(client: redis::Client) -> Self {
        Self {
            redis: Some(Arc::new(RedisLink {
                client,
                conn: Mutex::new(None),
            })),
            ..Self::local()
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResumeChanged> {
        self.local.subscribe()
    }

    pub async fn publish(&self, event: ResumeChanged) {
        if let Some(link) = &self.redis {
            match link.publish(&event).await {
                Ok(()) => return,
                Err(e) => warn!(
                    "Redis publish for resume {} failed, delivering locally: {e}",
                    event.resume_id
                ),
            }
        }
        self.deliver(event);
    }

    fn deliver(&self, event: ResumeChanged) {
        let resume_id = event.resume_id;
        if self.local.send(event).is_err() {
            debug!("No live subscribers for resume {resume_id}");
        }
    }

    /// Forwards everything on the Redis channel into the local broadcast, reconnecting on failure.
    pub fn spawn_bridge(&self) {
        let Some(client) = self.redis.as_ref().map(|link| link.client.clone()) else {
            return;
        };
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                match hub.run_bridge(&client).await {
                    Ok(()) => warn!("Redis live-update subscription ended, reconnecting"),
                    Err(e) => warn!("Redis live-update bridge failed: {e}"),
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });
    }

    async fn run_bridge(&self, client: &redis::Client) -> redis::RedisResult<()> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(CHANNEL).await?;
        info!("Subscribed to Redis channel {CHANNEL}");

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = msg.get_payload()?;
            match serde_json::from_str::<ResumeChanged>(&payload) {
                Ok(event) => {
                    debug!("Live update for resume {}", event.resume_id);
                    self.deliver(event);
                }
                Err(e) => warn!("Ignoring malformed live-update payload: {e}"),
            }
        }
        Ok(())
    }
}
