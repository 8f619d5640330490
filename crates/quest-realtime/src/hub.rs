use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use quest_client::{ClientError, SessionProvider};

use crate::RealtimeTransport;
use crate::subscription::{EVENT_BUFFER, PushEvent, Subscription};

/// In-process realtime source. Everything published lands on one broadcast
/// channel; each subscription filters it down to its own quest.
///
/// Used by tests and by embedders that produce inserts locally.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

#[derive(Clone)]
enum HubEvent {
    Insert(Uuid, Value),
    /// Ends every subscription on the quest, as a lost upstream would.
    Disconnect(Uuid),
}

struct HubInner {
    broadcast_tx: broadcast::Sender<HubEvent>,

    /// quest_id -> live subscription count
    active: Mutex<HashMap<Uuid, usize>>,
}

impl LocalHub {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(HubInner {
                broadcast_tx,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Push an inserted row for `quest_id`. Returns how many subscriptions
    /// were attached to that quest at the time.
    pub fn publish(&self, quest_id: Uuid, record: Value) -> usize {
        let _ = self.inner.broadcast_tx.send(HubEvent::Insert(quest_id, record));
        self.subscriber_count(quest_id)
    }

    /// End every subscription on `quest_id`. Each gets an error event and
    /// then its stream closes. Returns how many were attached.
    pub fn disconnect(&self, quest_id: Uuid) -> usize {
        let attached = self.subscriber_count(quest_id);
        let _ = self.inner.broadcast_tx.send(HubEvent::Disconnect(quest_id));
        attached
    }

    pub fn subscriber_count(&self, quest_id: Uuid) -> usize {
        self.inner
            .active
            .lock()
            .map(|active| active.get(&quest_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn register(&self, quest_id: Uuid) {
        if let Ok(mut active) = self.inner.active.lock() {
            *active.entry(quest_id).or_insert(0) += 1;
        }
    }

    fn unregister(&self, quest_id: Uuid) {
        if let Ok(mut active) = self.inner.active.lock()
            && let Some(count) = active.get_mut(&quest_id)
        {
            *count -= 1;
            if *count == 0 {
                active.remove(&quest_id);
            }
        }
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeTransport for LocalHub {
    fn subscribe(&self, quest_id: Uuid, _sessions: Arc<dyn SessionProvider>) -> Result<Subscription, ClientError> {
        let mut broadcast_rx = self.inner.broadcast_tx.subscribe();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (leave_tx, mut leave_rx) = oneshot::channel::<()>();

        // Counted before returning so a publish right after subscribe is seen.
        self.register(quest_id);
        let hub = self.clone();

        tokio::spawn(async move {
            if tx.send(PushEvent::Joined).await.is_ok() {
                loop {
                    tokio::select! {
                        _ = &mut leave_rx => break,
                        result = broadcast_rx.recv() => {
                            let record = match result {
                                Ok(HubEvent::Insert(id, record)) if id == quest_id => record,
                                Ok(HubEvent::Disconnect(id)) if id == quest_id => {
                                    let _ = tx.send(PushEvent::Error("hub disconnected".into())).await;
                                    break;
                                }
                                Ok(_) => continue,
                                Err(RecvError::Lagged(n)) => {
                                    warn!("Hub receiver for quest {} lagged by {} inserts", quest_id, n);
                                    continue;
                                }
                                Err(RecvError::Closed) => break,
                            };
                            if tx.send(PushEvent::Insert(record)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            hub.unregister(quest_id);
            debug!("Hub subscription for quest {} closed", quest_id);
        });

        Ok(Subscription::new(quest_id, rx, leave_tx))
    }
}
