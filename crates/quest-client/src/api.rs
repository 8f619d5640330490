use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use quest_types::api::{
    Accepted, CreateQuestRequest, ErrorBody, GenerateImageRequest, GuideResponse,
    GuideUpdateRequest, SendMessageRequest,
};
use quest_types::{ContentPart, Message, Quest, QuestDetail, preview};

use crate::config::ClientConfig;
use crate::error::{ClientError, DEFAULT_NOT_FOUND};
use crate::session::{Session, SessionProvider, fresh_session};

/// Bearer-authenticated client for the quest backend.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    config: Arc<ClientConfig>,
    session: Arc<dyn SessionProvider>,
}

impl ApiClient {
    pub fn new(config: ClientConfig, session: Arc<dyn SessionProvider>) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self::with_http(http, config, session))
    }

    pub fn with_http(http: Client, config: ClientConfig, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            http,
            config: Arc::new(config),
            session,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn sessions(&self) -> &Arc<dyn SessionProvider> {
        &self.session
    }

    /// A credential good for the next request. `AuthRequired` when signed out.
    pub async fn session(&self) -> Result<Session, ClientError> {
        fresh_session(self.session.as_ref()).await
    }

    // -- Quests --

    pub async fn list_quests(&self) -> Result<Vec<Quest>, ClientError> {
        let resp = self.send(self.request(Method::GET, "quests").await?).await?;
        decode(resp).await
    }

    pub async fn create_quest(&self, initial_prompt: Option<&str>) -> Result<Quest, ClientError> {
        let body = CreateQuestRequest {
            initial_prompt: initial_prompt
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from),
        };
        let resp = self
            .send(self.request(Method::POST, "quests").await?.json(&body))
            .await?;
        let quest: Quest = decode(resp).await?;
        info!("Created quest {}", quest.id);
        Ok(quest)
    }

    pub async fn get_quest(&self, quest_id: Uuid) -> Result<QuestDetail, ClientError> {
        let path = format!("quests/{}", quest_id);
        let resp = self.send(self.request(Method::GET, &path).await?).await?;
        decode(resp).await
    }

    /// Removes the quest and its whole transcript.
    pub async fn delete_quest(&self, quest_id: Uuid) -> Result<(), ClientError> {
        let path = format!("quests/{}", quest_id);
        self.send(self.request(Method::DELETE, &path).await?).await?;
        info!("Deleted quest {}", quest_id);
        Ok(())
    }

    // -- Messages --

    /// Posts a user turn. The assistant's reply arrives over realtime; the
    /// stored user message is returned when the backend echoes it.
    pub async fn send_message(
        &self,
        quest_id: Uuid,
        content: Vec<ContentPart>,
    ) -> Result<Option<Message>, ClientError> {
        let path = format!("quests/{}/messages", quest_id);
        let body = SendMessageRequest { content };
        let resp = self
            .send(self.request(Method::POST, &path).await?.json(&body))
            .await?;

        let bytes = resp.bytes().await?;
        match serde_json::from_slice::<Message>(&bytes) {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                debug!("Send on quest {} returned no message echo: {}", quest_id, e);
                Ok(None)
            }
        }
    }

    /// Queues image generation. The result is posted into the quest as an
    /// assistant message.
    pub async fn generate_image(&self, quest_id: Uuid, prompt: &str) -> Result<(), ClientError> {
        let path = format!("quests/{}/generate-image", quest_id);
        let body = GenerateImageRequest {
            prompt: prompt.to_string(),
        };
        let resp = self
            .send(self.request(Method::POST, &path).await?.json(&body))
            .await?;
        let accepted: Accepted = decode(resp).await.unwrap_or_default();
        debug!(
            "Image generation accepted for quest {}: {}",
            quest_id,
            accepted.message.as_deref().unwrap_or("-")
        );
        Ok(())
    }

    // -- Guide --

    pub async fn get_guide(&self) -> Result<Option<String>, ClientError> {
        let resp = self.send(self.request(Method::GET, "guide").await?).await?;
        let guide: GuideResponse = decode(resp).await?;
        Ok(guide.prompt)
    }

    pub async fn set_guide(&self, prompt: &str) -> Result<Option<String>, ClientError> {
        let body = GuideUpdateRequest {
            prompt: prompt.to_string(),
        };
        let resp = self
            .send(self.request(Method::PUT, "guide").await?.json(&body))
            .await?;
        let guide: GuideResponse = decode(resp).await?;
        Ok(guide.prompt)
    }

    // -- Plumbing --

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let session = self.session().await?;
        let url = self.config.endpoint(path)?;
        debug!("{} {}", method, url);
        Ok(self.http.request(method, url).bearer_auth(session.access_token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let resp = request.send().await?;
        check_status(resp).await
    }
}

/// Map non-2xx responses onto the error taxonomy, keeping the server's
/// `detail` text.
pub(crate) async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let url = resp.url().clone();
    let detail = resp
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message());

    warn!("{} returned {}", url.path(), status);

    Err(match status {
        StatusCode::UNAUTHORIZED => ClientError::AuthRequired,
        StatusCode::NOT_FOUND => {
            ClientError::NotFound(detail.unwrap_or_else(|| DEFAULT_NOT_FOUND.into()))
        }
        _ => ClientError::Server {
            status: status.as_u16(),
            message: detail.unwrap_or_else(|| {
                format!(
                    "Request failed: {}",
                    status.canonical_reason().unwrap_or(status.as_str())
                )
            }),
        },
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        let raw = String::from_utf8_lossy(&bytes);
        warn!("Undecodable body: {} -- raw: {}", e, preview(&raw, 200));
        ClientError::Decode(e.to_string())
    })
}
