use std::time::Duration;

use tokio::time::Instant;

use quest_types::Role;

/// Whether an assistant reply is outstanding. Drives the typing indicator and
/// hides suggestion chips while awaiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RespondingState {
    #[default]
    Idle,
    AwaitingResponse { since: Instant },
}

impl RespondingState {
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingResponse { .. })
    }

    /// A user turn went out (or a suggestion was clicked). Re-arms the clock
    /// when already awaiting.
    pub fn begin(&mut self, now: Instant) {
        *self = Self::AwaitingResponse { since: now };
    }

    /// Back to idle only for a fresh assistant insert. Returns whether the
    /// state changed.
    pub fn on_insert(&mut self, inserted: bool, role: Role) -> bool {
        if inserted && role == Role::Assistant && self.is_awaiting() {
            *self = Self::Idle;
            return true;
        }
        false
    }

    /// Give up waiting once `timeout` has passed since [`begin`](Self::begin).
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> bool {
        match *self {
            Self::AwaitingResponse { since } if now.saturating_duration_since(since) >= timeout => {
                *self = Self::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self, timeout: Duration) -> Option<Instant> {
        match *self {
            Self::AwaitingResponse { since } => Some(since + timeout),
            Self::Idle => None,
        }
    }
}
