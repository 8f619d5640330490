//! Live delivery of newly inserted messages for one quest at a time.
//!
//! A [`RealtimeTransport`] hands out [`Subscription`]s. Each subscription is
//! scoped to a single quest and owns the task feeding it; dropping it detaches
//! immediately, so no event for that quest reaches the caller afterwards.

pub mod hub;
pub mod subscription;
pub mod ws;

pub use hub::LocalHub;
pub use subscription::{PushEvent, Subscription, decode_record};
pub use ws::{WsOptions, WsTransport};

use std::sync::Arc;

use uuid::Uuid;

use quest_client::{ClientError, SessionProvider};

/// Source of push events. Implementations spawn their own task and must be
/// called from inside a tokio runtime.
pub trait RealtimeTransport: Send + Sync {
    /// `sessions` is read again on every (re)join, so a reconnect after the
    /// access token rotated presents the current one.
    fn subscribe(&self, quest_id: Uuid, sessions: Arc<dyn SessionProvider>) -> Result<Subscription, ClientError>;
}
