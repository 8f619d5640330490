use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use quest_client::ClientError;
use quest_types::{Message, preview};

/// Buffer between a transport task and its subscriber.
pub(crate) const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The channel is live; inserts from here on will be delivered.
    Joined,
    /// A row was inserted for the subscribed quest. Undecoded.
    Insert(Value),
    /// The transport hit a problem. Reconnecting transports keep going.
    Error(String),
}

/// A live attachment to one quest's inserts.
///
/// Dropping the subscription (or calling [`Subscription::detach`]) closes the
/// event channel and signals the feeding task to leave.
pub struct Subscription {
    quest_id: Uuid,
    events: mpsc::Receiver<PushEvent>,
    leave: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub(crate) fn new(
        quest_id: Uuid,
        events: mpsc::Receiver<PushEvent>,
        leave: oneshot::Sender<()>,
    ) -> Self {
        Self {
            quest_id,
            events,
            leave: Some(leave),
        }
    }

    pub fn quest_id(&self) -> Uuid {
        self.quest_id
    }

    /// Next event, or `None` once the transport gave up. Cancel safe.
    pub async fn next(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }

    pub fn detach(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.events.close();
        if let Some(leave) = self.leave.take() {
            let _ = leave.send(());
        }
        debug!("Detached from quest {}", self.quest_id);
    }
}

/// Decode an inserted row into a [`Message`]. Malformed rows are logged with
/// a short preview of the raw record and reported as
/// [`ClientError::MalformedPushPayload`].
pub fn decode_record(record: Value) -> Result<Message, ClientError> {
    match serde_json::from_value::<Message>(record.clone()) {
        Ok(message) => Ok(message),
        Err(e) => {
            let raw = record.to_string();
            warn!("Dropping malformed push payload: {} -- raw: {}", e, preview(&raw, 200));
            Err(ClientError::MalformedPushPayload(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_inserted_rows() {
        let quest_id = Uuid::new_v4();
        let record = json!({
            "id": Uuid::new_v4(),
            "quest_id": quest_id,
            "user_id": Uuid::new_v4(),
            "role": "model",
            "content": [{"type": "text", "text": "Hello!"}],
            "created_at": "2025-03-01 10:00:05.123+00",
            "metadata": {"suggestions": ["Tell me more"]},
        });
        let message = decode_record(record).unwrap();
        assert_eq!(message.quest_id, quest_id);
        assert!(message.is_assistant());
        assert_eq!(message.text(), "Hello!");
        assert_eq!(message.suggestions(), ["Tell me more".to_string()]);
    }

    #[test]
    fn rejects_rows_without_an_id() {
        let err = decode_record(json!({"role": "user", "content": "hi"})).unwrap_err();
        assert!(matches!(err, ClientError::MalformedPushPayload(_)));
    }

    #[tokio::test]
    async fn dropping_signals_the_task() {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (leave_tx, leave_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = leave_rx.await;
            let _ = done_tx.send(tx.is_closed());
        });

        let sub = Subscription::new(Uuid::new_v4(), rx, leave_tx);
        sub.detach();

        assert!(done_rx.await.unwrap(), "event channel closed before the task saw the leave");
    }
}
