use thiserror::Error;

/// Shown when a 404 carries no usable detail.
pub const DEFAULT_NOT_FOUND: &str = "Quest not found or access denied";

/// Input problems caught before anything touches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Type a message or attach an image first.")]
    EmptyMessage,
    #[error("Tell me what to draw after /generate.")]
    EmptyGenerationPrompt,
    #[error("Image generation can't be combined with an attached image.")]
    GenerationWithImage,
    #[error("The guide prompt can't be empty.")]
    EmptyGuide,
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// No session, or the provider rejected the credential. Callers redirect
    /// to sign-in.
    #[error("sign-in required")]
    AuthRequired,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    /// Non-2xx other than 401/404. `message` is the server's `detail` when
    /// it sent one.
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("malformed push payload: {0}")]
    MalformedPushPayload(String),

    #[error("realtime: {0}")]
    Realtime(String),

    #[error("image: {0}")]
    Image(String),

    #[error("config: {0}")]
    Config(String),
}

impl ClientError {
    pub fn is_auth_required(&self) -> bool {
        matches!(self, Self::AuthRequired)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Text a view puts in its inline error slot.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthRequired => "Your session has expired. Please sign in again.".into(),
            Self::Validation(e) => e.to_string(),
            Self::NotFound(msg) | Self::Server { message: msg, .. } => msg.clone(),
            Self::Network(e) if e.is_timeout() => {
                "The server took too long to respond. Please try again.".into()
            }
            Self::Network(_) => "Couldn't reach the server. Check your connection and try again.".into(),
            Self::Decode(_) => "The server sent a response this app doesn't understand.".into(),
            Self::MalformedPushPayload(_) | Self::Realtime(_) => {
                "Live updates are unavailable right now.".into()
            }
            Self::Image(msg) => format!("Couldn't prepare the image: {}", msg),
            Self::Config(msg) => format!("Configuration error: {}", msg),
        }
    }
}

impl From<image::ImageError> for ClientError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e.to_string())
    }
}
