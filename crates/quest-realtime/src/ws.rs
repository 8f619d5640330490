use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use quest_client::session::fresh_session;
use quest_client::{ClientError, ProviderConfig, SessionProvider};
use quest_types::events::{ChannelEvent, ChannelFrame};
use quest_types::preview;

use crate::RealtimeTransport;
use crate::subscription::{EVENT_BUFFER, PushEvent, Subscription};

/// Heartbeat on the `phoenix` topic every 25 seconds.
/// If 2 consecutive replies are missed the connection is dropped and rebuilt.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug, Clone)]
pub struct WsOptions {
    pub heartbeat_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }
}

/// Realtime over the provider's channel socket. One socket per subscription.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
    options: WsOptions,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self::with_options(url, WsOptions::default())
    }

    pub fn with_options(url: Url, options: WsOptions) -> Self {
        Self { url, options }
    }

    pub fn from_provider(provider: &ProviderConfig) -> Self {
        Self::new(provider.realtime_url.clone())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl RealtimeTransport for WsTransport {
    fn subscribe(&self, quest_id: Uuid, sessions: Arc<dyn SessionProvider>) -> Result<Subscription, ClientError> {
        if !matches!(self.url.scheme(), "ws" | "wss") {
            return Err(ClientError::Realtime(format!(
                "unsupported realtime scheme: {}",
                self.url.scheme()
            )));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (leave_tx, leave_rx) = oneshot::channel();
        let channel = Channel {
            url: self.url.clone(),
            options: self.options.clone(),
            quest_id,
            sessions,
            tx,
            next_ref: 0,
        };
        tokio::spawn(channel.run(leave_rx));

        Ok(Subscription::new(quest_id, rx, leave_tx))
    }
}

/// Why a single socket session ended.
#[derive(Debug)]
enum Outcome {
    Left,
    SubscriberGone,
    Rejected(String),
    Dropped(String),
}

struct Channel {
    url: Url,
    options: WsOptions,
    quest_id: Uuid,
    sessions: Arc<dyn SessionProvider>,
    tx: mpsc::Sender<PushEvent>,
    next_ref: u64,
}

impl Channel {
    fn next_ref(&mut self) -> u64 {
        self.next_ref += 1;
        self.next_ref
    }

    /// Connect, join, forward; on a dropped socket back off and do it again
    /// until the subscriber leaves.
    async fn run(mut self, mut leave_rx: oneshot::Receiver<()>) {
        let mut backoff = self.options.initial_backoff;

        loop {
            // Each attempt joins with whatever token the session holds now.
            let access_token = match fresh_session(self.sessions.as_ref()).await {
                Ok(session) => session.access_token,
                Err(e) => {
                    warn!("No usable session for realtime on quest {}: {}", self.quest_id, e);
                    let _ = self.tx.send(PushEvent::Error(e.to_string())).await;
                    return;
                }
            };

            let connected = tokio::select! {
                _ = &mut leave_rx => return,
                result = connect_async(self.url.as_str()) => result,
            };

            let outcome = match connected {
                Ok((socket, _)) => {
                    backoff = self.options.initial_backoff;
                    let (sink, source) = socket.split();
                    self.session(sink, source, &access_token, &mut leave_rx).await
                }
                Err(e) => Outcome::Dropped(format!("connect failed: {}", e)),
            };

            match outcome {
                Outcome::Left => {
                    debug!("Left realtime channel for quest {}", self.quest_id);
                    return;
                }
                Outcome::SubscriberGone => return,
                Outcome::Rejected(reason) => {
                    warn!("Realtime join for quest {} rejected: {}", self.quest_id, reason);
                    let _ = self.tx.send(PushEvent::Error(reason)).await;
                    return;
                }
                Outcome::Dropped(reason) => {
                    warn!(
                        "Realtime connection for quest {} dropped: {}; retrying in {:?}",
                        self.quest_id, reason, backoff
                    );
                    if self.tx.send(PushEvent::Error(reason)).await.is_err() {
                        return;
                    }
                }
            }

            tokio::select! {
                _ = &mut leave_rx => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.options.max_backoff);
        }
    }

    async fn session(
        &mut self,
        mut sink: WsSink,
        mut source: WsSource,
        access_token: &str,
        leave_rx: &mut oneshot::Receiver<()>,
    ) -> Outcome {
        let join_ref = self.next_ref();
        let join = ChannelFrame::join(self.quest_id, access_token, join_ref);
        if let Err(e) = send_frame(&mut sink, &join).await {
            return Outcome::Dropped(e);
        }
        let join_ref = join_ref.to_string();

        let mut heartbeat = tokio::time::interval(self.options.heartbeat_interval);
        heartbeat.tick().await;
        let mut pending_heartbeat: Option<String> = None;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                _ = &mut *leave_rx => {
                    let leave = ChannelFrame::leave(self.quest_id, self.next_ref());
                    let _ = send_frame(&mut sink, &leave).await;
                    let _ = sink.close().await;
                    return Outcome::Left;
                }
                msg = source.next() => {
                    let text = match msg {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(_))) | None => {
                            return Outcome::Dropped("socket closed".into());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Outcome::Dropped(e.to_string()),
                    };

                    let frame: ChannelFrame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Unparseable realtime frame: {} -- raw: {}", e, preview(&text, 200));
                            continue;
                        }
                    };

                    match frame.classify() {
                        ChannelEvent::Reply { reference, ok, response } => {
                            if reference.as_deref() == Some(join_ref.as_str()) {
                                if !ok {
                                    return Outcome::Rejected(reply_reason(&response));
                                }
                                info!("Joined realtime channel for quest {}", self.quest_id);
                                if self.tx.send(PushEvent::Joined).await.is_err() {
                                    return Outcome::SubscriberGone;
                                }
                            } else if reference.is_some() && reference == pending_heartbeat {
                                pending_heartbeat = None;
                                missed_heartbeats = 0;
                            }
                        }
                        ChannelEvent::Change(change) => {
                            if !change.is_message_insert() {
                                trace!("Ignoring {} change on quest {}", change.kind, self.quest_id);
                                continue;
                            }
                            if self.tx.send(PushEvent::Insert(change.record)).await.is_err() {
                                return Outcome::SubscriberGone;
                            }
                        }
                        ChannelEvent::Malformed(reason) => {
                            warn!(
                                "Dropping malformed change for quest {}: {} -- raw: {}",
                                self.quest_id,
                                reason,
                                preview(&text, 200)
                            );
                        }
                        ChannelEvent::Error(payload) => {
                            return Outcome::Dropped(format!("channel error: {}", payload));
                        }
                        ChannelEvent::Closed => {
                            return Outcome::Dropped("channel closed by server".into());
                        }
                        ChannelEvent::Other(event) => {
                            trace!("Ignoring realtime event {}", event);
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if pending_heartbeat.is_some() {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            return Outcome::Dropped(format!(
                                "heartbeat timeout (missed {} replies)",
                                missed_heartbeats
                            ));
                        }
                    }
                    let reference = self.next_ref();
                    if let Err(e) = send_frame(&mut sink, &ChannelFrame::heartbeat(reference)).await {
                        return Outcome::Dropped(e);
                    }
                    pending_heartbeat = Some(reference.to_string());
                }
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &ChannelFrame) -> Result<(), String> {
    let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}

fn reply_reason(response: &Value) -> String {
    response
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("join rejected")
        .to_string()
}
