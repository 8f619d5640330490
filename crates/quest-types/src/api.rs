use serde::{Deserialize, Serialize};

use crate::models::ContentPart;

// -- Quests --

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateQuestRequest {
    /// Seeds the server-derived title. The transcript still starts empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt: String,
}

/// Body of a 202 from endpoints whose result arrives over realtime.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Accepted {
    #[serde(default)]
    pub message: Option<String>,
}

// -- Guide --

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GuideResponse {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GuideUpdateRequest {
    pub prompt: String,
}

// -- Errors --

/// Error body returned with non-2xx responses.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    /// The `detail` as display text. Validation failures send a list of
    /// objects instead of a string; those are flattened to their `msg`s.
    pub fn message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            serde_json::Value::Array(items) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .collect();
                if msgs.is_empty() { None } else { Some(msgs.join("; ")) }
            }
            _ => None,
        }
    }
}
