use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ProviderConfig;
use crate::error::ClientError;

/// Refresh ahead of expiry by this much.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Claims read out of the provider's access token. The signature is not
/// checked here; the backend verifies every request.
#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn from_access_token(token: &str) -> Result<Self, ClientError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| {
                warn!("Unreadable access token: {}", e);
                ClientError::AuthRequired
            })?;

        Ok(Self {
            access_token: token.to_string(),
            refresh_token: None,
            user_id: data.claims.sub,
            email: data.claims.email,
            expires_at: data
                .claims
                .exp
                .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0)),
        })
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        self.expires_at.is_some_and(|at| at <= now + margin)
    }
}

/// Issues and refreshes the bearer credential. This crate only ever reads it.
pub trait SessionProvider: Send + Sync {
    fn current(&self) -> Option<Session>;

    fn refresh(&self) -> BoxFuture<'_, Result<Session, ClientError>>;

    fn sign_out(&self) -> BoxFuture<'_, Result<(), ClientError>>;
}

/// The credential to use for the next request, refreshing it first when it
/// is about to lapse.
pub async fn fresh_session(provider: &dyn SessionProvider) -> Result<Session, ClientError> {
    let session = provider.current().ok_or(ClientError::AuthRequired)?;
    let now = Utc::now();

    if !session.expires_within(now, REFRESH_MARGIN) {
        return Ok(session);
    }

    match provider.refresh().await {
        Ok(fresh) => Ok(fresh),
        Err(e) if !session.is_expired(now) && !e.is_auth_required() => {
            warn!("Session refresh failed, using current token until expiry: {}", e);
            Ok(session)
        }
        Err(e) => {
            warn!("Session refresh failed: {}", e);
            Err(ClientError::AuthRequired)
        }
    }
}

// ── Static token ────────────────────────────────────────────────────────

/// A fixed access token, e.g. from `QUEST_ACCESS_TOKEN`. Cannot refresh.
pub struct StaticSession {
    session: RwLock<Option<Session>>,
}

impl StaticSession {
    pub fn new(session: Session) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }

    pub fn from_token(token: &str) -> Result<Self, ClientError> {
        Ok(Self::new(Session::from_access_token(token)?))
    }

    /// No credential at all; every request reports `AuthRequired`.
    pub fn signed_out() -> Self {
        Self {
            session: RwLock::new(None),
        }
    }
}

impl SessionProvider for StaticSession {
    fn current(&self) -> Option<Session> {
        self.session.read().ok()?.clone()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<Session, ClientError>> {
        Box::pin(async move {
            match self.current() {
                Some(session) if !session.is_expired(Utc::now()) => Ok(session),
                _ => Err(ClientError::AuthRequired),
            }
        })
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), ClientError>> {
        Box::pin(async move {
            if let Ok(mut slot) = self.session.write() {
                *slot = None;
            }
            Ok(())
        })
    }
}

// ── Provider auth API ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    /// The provider wants the address confirmed before issuing a session.
    ConfirmationSent,
}

/// Email/password sessions against the provider's REST auth API.
pub struct AuthSession {
    http: Client,
    provider: ProviderConfig,
    session: RwLock<Option<Session>>,
}

impl AuthSession {
    pub fn new(http: Client, provider: ProviderConfig) -> Self {
        Self {
            http,
            provider,
            session: RwLock::new(None),
        }
    }

    /// Resume a session persisted by an earlier run.
    pub fn with_session(self, session: Session) -> Self {
        self.store(Some(session));
        self
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let url = self.provider.auth_endpoint("token?grant_type=password")?;
        let body = serde_json::json!({ "email": email, "password": password });
        let session = self.token_request(url, &body).await?;
        info!("Signed in as {}", session.user_id);
        self.store(Some(session.clone()));
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, ClientError> {
        let url = self.provider.auth_endpoint("signup")?;
        let body = serde_json::json!({ "email": email, "password": password });
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.provider.anon_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(auth_error(resp).await);
        }

        let value: serde_json::Value = resp.json().await?;
        if value.get("access_token").is_none() {
            info!("Sign-up accepted, confirmation pending for {}", email);
            return Ok(SignUpOutcome::ConfirmationSent);
        }

        let token: TokenResponse =
            serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))?;
        let session = session_from_token(token)?;
        self.store(Some(session.clone()));
        Ok(SignUpOutcome::SignedIn(session))
    }

    async fn token_request(&self, url: url::Url, body: &serde_json::Value) -> Result<Session, ClientError> {
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.provider.anon_key)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(auth_error(resp).await);
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        session_from_token(token)
    }

    fn store(&self, session: Option<Session>) {
        if let Ok(mut slot) = self.session.write() {
            *slot = session;
        }
    }
}

impl SessionProvider for AuthSession {
    fn current(&self) -> Option<Session> {
        self.session.read().ok()?.clone()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<Session, ClientError>> {
        Box::pin(async move {
            let refresh_token = self
                .current()
                .and_then(|s| s.refresh_token)
                .ok_or(ClientError::AuthRequired)?;

            let url = self.provider.auth_endpoint("token?grant_type=refresh_token")?;
            let body = serde_json::json!({ "refresh_token": refresh_token });
            match self.token_request(url, &body).await {
                Ok(session) => {
                    self.store(Some(session.clone()));
                    Ok(session)
                }
                Err(e @ ClientError::Network(_)) => Err(e),
                Err(e) => {
                    warn!("Refresh token rejected: {}", e);
                    self.store(None);
                    Err(ClientError::AuthRequired)
                }
            }
        })
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), ClientError>> {
        Box::pin(async move {
            let Some(session) = self.current() else {
                return Ok(());
            };
            self.store(None);

            let url = self.provider.auth_endpoint("logout")?;
            let resp = self
                .http
                .post(url)
                .header("apikey", &self.provider.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await?;
            if !resp.status().is_success() {
                // Local state is already gone; the token will simply expire.
                warn!("Provider sign-out returned {}", resp.status());
            }
            Ok(())
        })
    }
}

fn session_from_token(token: TokenResponse) -> Result<Session, ClientError> {
    let mut session = Session::from_access_token(&token.access_token)?;
    session.refresh_token = token.refresh_token;
    if let Some(at) = token.expires_at.and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0)) {
        session.expires_at = Some(at);
    }
    Ok(session)
}

async fn auth_error(resp: reqwest::Response) -> ClientError {
    let status = resp.status().as_u16();
    let body: AuthErrorBody = resp.json().await.unwrap_or_default();
    let message = body
        .msg
        .or(body.error_description)
        .or(body.message)
        .unwrap_or_else(|| format!("Authentication failed ({})", status));
    ClientError::Server { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token_for(user_id: Uuid, exp: i64) -> String {
        let claims = serde_json::json!({
            "sub": user_id,
            "email": "kid@example.com",
            "exp": exp,
            "aud": "authenticated",
            "role": "authenticated",
        });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"provider-secret")).unwrap()
    }

    #[test]
    fn reads_claims_without_the_provider_secret() {
        let user_id = Uuid::new_v4();
        let exp = Utc::now().timestamp() + 3600;
        let session = Session::from_access_token(&token_for(user_id, exp)).unwrap();
        assert_eq!(session.user_id, user_id);
        assert_eq!(session.email.as_deref(), Some("kid@example.com"));
        assert_eq!(session.expires_at.unwrap().timestamp(), exp);
        assert!(!session.is_expired(Utc::now()));
    }

    #[test]
    fn garbage_token_requires_auth() {
        let err = Session::from_access_token("not-a-jwt").unwrap_err();
        assert!(err.is_auth_required());
    }

    #[test]
    fn expiry_margin() {
        let user_id = Uuid::new_v4();
        let session = Session::from_access_token(&token_for(user_id, Utc::now().timestamp() + 30)).unwrap();
        assert!(session.expires_within(Utc::now(), REFRESH_MARGIN));
        assert!(!session.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn static_session_cannot_outlive_its_token() {
        let user_id = Uuid::new_v4();
        let expired = StaticSession::from_token(&token_for(user_id, Utc::now().timestamp() - 10)).unwrap();
        let err = fresh_session(&expired).await.unwrap_err();
        assert!(err.is_auth_required());

        let valid = StaticSession::from_token(&token_for(user_id, Utc::now().timestamp() + 3600)).unwrap();
        assert_eq!(fresh_session(&valid).await.unwrap().user_id, user_id);

        valid.sign_out().await.unwrap();
        assert!(fresh_session(&valid).await.unwrap_err().is_auth_required());
    }
}
