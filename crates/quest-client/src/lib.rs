//! Session-aware client for the quest backend: configuration, the error
//! taxonomy shared by every layer above, credential handling, the REST
//! surface and the image upload pipeline.

pub mod api;
pub mod config;
pub mod error;
pub mod images;
pub mod session;

pub use api::ApiClient;
pub use config::{ClientConfig, ImageLimits, ProviderConfig};
pub use error::{ClientError, ValidationError};
pub use images::{ImageAttachment, ImageStore};
pub use session::{AuthSession, Session, SessionProvider, SignUpOutcome, StaticSession};
