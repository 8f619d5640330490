use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Title shown for quests the backend has not named yet.
pub const UNTITLED_QUEST: &str = "New Quest";

// -- Quests --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quest {
    pub id: Uuid,
    /// Owner of the quest.
    pub user_id: Uuid,
    /// Derived server-side; may be null until computed.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub last_updated_at: DateTime<Utc>,
    /// Display only.
    #[serde(default)]
    pub message_count: Option<i64>,
}

impl Quest {
    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title,
            _ => UNTITLED_QUEST,
        }
    }
}

/// A quest together with its full, server-ordered transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestDetail {
    #[serde(flatten)]
    pub quest: Quest,
    #[serde(default)]
    pub messages: Vec<Message>,
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    /// The backend stores assistant turns as `"model"`.
    #[serde(alias = "model")]
    Assistant,
    System,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "you",
            Self::Assistant => "guide",
            Self::System => "system",
        }
    }
}

/// One part of a message body. Order of parts is display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    /// Part types this client does not know how to show.
    #[serde(other)]
    Unsupported,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

/// Older rows carry `image_url` as a bare string instead of `{url}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ImageUrlRepr")]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImageUrlRepr {
    Bare(String),
    Object { url: String },
}

impl From<ImageUrlRepr> for ImageUrl {
    fn from(repr: ImageUrlRepr) -> Self {
        match repr {
            ImageUrlRepr::Bare(url) | ImageUrlRepr::Object { url } => Self { url },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Follow-up prompts offered after an assistant turn.
    #[serde(default, deserialize_with = "null_as_default")]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub quest_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub role: Role,
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<ContentPart>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// All text parts joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn image_urls(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Suggestions carried by this message. Only assistant turns offer any.
    pub fn suggestions(&self) -> &[String] {
        match (&self.role, &self.metadata) {
            (Role::Assistant, Some(meta)) => meta.suggestions.as_slice(),
            _ => &[],
        }
    }
}

/// Message bodies arrive either as a plain string or as a list of parts.
#[derive(Deserialize)]
#[serde(untagged)]
enum ContentRepr {
    Text(String),
    Parts(Vec<ContentPart>),
}

fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<ContentPart>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match ContentRepr::deserialize(deserializer)? {
        ContentRepr::Text(text) => vec![ContentPart::Text { text }],
        ContentRepr::Parts(parts) => parts,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Timestamps come from two places: the REST API (RFC 3339) and realtime row
/// payloads, which may use Postgres' `YYYY-MM-DD HH:MM:SS.ffffff+00` form.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
            if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
                return Some(ts.with_timezone(&Utc));
            }
        }
        // No offset at all: treat as UTC.
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(ndt.and_utc());
            }
        }
        None
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw)))
    }
}
