use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::debug;

use quest_client::{
    ApiClient, AuthSession, ClientConfig, ImageStore, SessionProvider, StaticSession,
};
use quest_realtime::WsTransport;

use crate::session_file;

/// Everything a command needs: configuration, the credential source and the
/// API client built on it.
pub struct App {
    pub config: ClientConfig,
    pub api: ApiClient,
    sessions: Arc<dyn SessionProvider>,
    auth: Option<Arc<AuthSession>>,
    session_file: PathBuf,
}

impl App {
    /// `QUEST_ACCESS_TOKEN` wins; otherwise the provider's password auth,
    /// resumed from the session file when one exists.
    pub fn new(config: ClientConfig, session_file: PathBuf) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.http_timeout).build()?;
        let saved = session_file::load(&session_file)?;

        let mut auth = None;
        let sessions: Arc<dyn SessionProvider> = match (&config.access_token, &config.provider) {
            (Some(token), _) => {
                debug!("Using static access token");
                Arc::new(StaticSession::from_token(token)?)
            }
            (None, Some(provider)) => {
                let mut provider_auth = AuthSession::new(http.clone(), provider.clone());
                if let Some(session) = saved {
                    provider_auth = provider_auth.with_session(session);
                }
                let provider_auth = Arc::new(provider_auth);
                auth = Some(provider_auth.clone());
                provider_auth
            }
            (None, None) => match saved {
                Some(session) => Arc::new(StaticSession::new(session)),
                None => Arc::new(StaticSession::signed_out()),
            },
        };

        let api = ApiClient::with_http(http, config.clone(), sessions.clone());
        Ok(Self {
            config,
            api,
            sessions,
            auth,
            session_file,
        })
    }

    pub fn auth(&self) -> anyhow::Result<&AuthSession> {
        self.auth.as_deref().ok_or_else(|| {
            anyhow!("signing in needs QUEST_SUPABASE_URL and QUEST_SUPABASE_ANON_KEY")
        })
    }

    pub fn sessions(&self) -> &dyn SessionProvider {
        self.sessions.as_ref()
    }

    /// Live updates, when a realtime endpoint is configured.
    pub fn transport(&self) -> Option<WsTransport> {
        self.config.provider.as_ref().map(WsTransport::from_provider)
    }

    pub fn image_store(&self) -> Option<ImageStore> {
        self.config
            .provider
            .clone()
            .map(|provider| ImageStore::new(self.api.http().clone(), provider))
    }

    pub fn forget_saved(&self) -> anyhow::Result<()> {
        session_file::clear(&self.session_file)
    }

    /// Write the current session back out; refreshes may have rotated it.
    pub fn persist(&self) -> anyhow::Result<()> {
        if self.auth.is_none() {
            return Ok(());
        }
        match self.sessions.current() {
            Some(session) => session_file::save(&self.session_file, &session),
            None => session_file::clear(&self.session_file),
        }
    }
}
