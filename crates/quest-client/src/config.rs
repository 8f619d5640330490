use std::time::Duration;

use url::Url;

use crate::error::ClientError;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_IMAGE_BUCKET: &str = "quest-images";
const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1920;
const DEFAULT_MAX_IMAGE_BYTES: usize = 1024 * 1024;

/// Limits applied to attached images before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
    /// Longest side, in pixels, after compression.
    pub max_dimension: u32,
    /// Images at or under this size (and within `max_dimension`) are sent as-is.
    pub max_bytes: usize,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// Auth/storage/realtime provider endpoints.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub url: Url,
    pub anon_key: String,
    pub realtime_url: Url,
    pub image_bucket: String,
}

impl ProviderConfig {
    pub fn new(url: Url, anon_key: impl Into<String>) -> Result<Self, ClientError> {
        let anon_key = anon_key.into();
        let realtime_url = derive_realtime_url(&url, &anon_key)?;
        Ok(Self {
            url,
            anon_key,
            realtime_url,
            image_bucket: DEFAULT_IMAGE_BUCKET.into(),
        })
    }

    pub fn auth_endpoint(&self, path: &str) -> Result<Url, ClientError> {
        join(&self.url, &format!("auth/v1/{}", path))
    }

    pub fn storage_endpoint(&self, path: &str) -> Result<Url, ClientError> {
        join(&self.url, &format!("storage/v1/{}", path))
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub provider: Option<ProviderConfig>,
    /// Static bearer token; skips interactive sign-in.
    pub access_token: Option<String>,
    /// How long to wait for an assistant reply. `None` waits forever.
    pub response_timeout: Option<Duration>,
    pub http_timeout: Duration,
    pub image_limits: ImageLimits,
}

impl ClientConfig {
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            provider: None,
            access_token: None,
            response_timeout: Some(Duration::from_secs(DEFAULT_RESPONSE_TIMEOUT_SECS)),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            image_limits: ImageLimits::default(),
        }
    }

    /// Read configuration from `QUEST_*` environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = parse_url("QUEST_API_URL", &get("QUEST_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()))?;
        let mut config = Self::new(api_url);

        match (get("QUEST_SUPABASE_URL"), get("QUEST_SUPABASE_ANON_KEY")) {
            (Some(url), Some(key)) => {
                let mut provider = ProviderConfig::new(parse_url("QUEST_SUPABASE_URL", &url)?, key)?;
                if let Some(realtime) = get("QUEST_REALTIME_URL") {
                    provider.realtime_url = parse_url("QUEST_REALTIME_URL", &realtime)?;
                }
                if let Some(bucket) = get("QUEST_IMAGE_BUCKET") {
                    provider.image_bucket = bucket;
                }
                config.provider = Some(provider);
            }
            (Some(_), None) => {
                return Err(ClientError::Config(
                    "QUEST_SUPABASE_ANON_KEY must be set together with QUEST_SUPABASE_URL".into(),
                ));
            }
            _ => {}
        }

        config.access_token = get("QUEST_ACCESS_TOKEN");

        if let Some(raw) = get("QUEST_RESPONSE_TIMEOUT_SECS") {
            let secs: u64 = parse_number("QUEST_RESPONSE_TIMEOUT_SECS", &raw)?;
            config.response_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = get("QUEST_HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(parse_number("QUEST_HTTP_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("QUEST_MAX_IMAGE_DIMENSION") {
            config.image_limits.max_dimension = parse_number("QUEST_MAX_IMAGE_DIMENSION", &raw)?;
        }
        if let Some(raw) = get("QUEST_MAX_IMAGE_BYTES") {
            config.image_limits.max_bytes = parse_number("QUEST_MAX_IMAGE_BYTES", &raw)?;
        }

        Ok(config)
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        join(&self.api_url, path)
    }
}

/// `https://x.supabase.co` -> `wss://x.supabase.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`
fn derive_realtime_url(base: &Url, anon_key: &str) -> Result<Url, ClientError> {
    let mut url = join(base, "realtime/v1/websocket")?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Config(format!("cannot derive realtime URL from {}", base)))?;
    url.query_pairs_mut()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

/// Join `path` onto `base` keeping any path prefix `base` already has.
fn join(base: &Url, path: &str) -> Result<Url, ClientError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ClientError::Config(format!("bad endpoint '{}': {}", path, e)))
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ClientError> {
    Url::parse(raw.trim()).map_err(|e| ClientError::Config(format!("{} is not a valid URL: {}", key, e)))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ClientError> {
    raw.trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_url.as_str(), "http://localhost:8000/");
        assert!(config.provider.is_none());
        assert_eq!(config.response_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.image_limits, ImageLimits::default());
    }

    #[test]
    fn realtime_url_is_derived_from_provider() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("QUEST_SUPABASE_URL", "https://abc.supabase.co"),
            ("QUEST_SUPABASE_ANON_KEY", "anon"),
        ]))
        .unwrap();
        let provider = config.provider.unwrap();
        assert_eq!(
            provider.realtime_url.as_str(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert_eq!(provider.image_bucket, "quest-images");
        assert_eq!(
            provider.auth_endpoint("token?grant_type=password").unwrap().as_str(),
            "https://abc.supabase.co/auth/v1/token?grant_type=password"
        );
    }

    #[test]
    fn zero_timeout_disables_response_timeout() {
        let config =
            ClientConfig::from_lookup(lookup(&[("QUEST_RESPONSE_TIMEOUT_SECS", "0")])).unwrap();
        assert_eq!(config.response_timeout, None);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = ClientConfig::from_lookup(lookup(&[("QUEST_MAX_IMAGE_BYTES", "lots")])).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));

        let err = ClientConfig::from_lookup(lookup(&[("QUEST_SUPABASE_URL", "https://a.co")])).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let config = ClientConfig::new(Url::parse("https://api.example.com/v1").unwrap());
        assert_eq!(
            config.endpoint("/quests/abc/messages").unwrap().as_str(),
            "https://api.example.com/v1/quests/abc/messages"
        );
    }
}
