use tracing::info;

use quest_client::{ApiClient, ClientError, ValidationError};

pub const GUIDE_SAVED_TOAST: &str = "Guide saved";

/// Edits the persona prompt the assistant plays.
pub struct GuideEditor {
    api: ApiClient,
    prompt: String,
    error: Option<String>,
}

impl GuideEditor {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            prompt: String::new(),
            error: None,
        }
    }

    /// Current prompt; empty when none has been set.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub async fn load(&mut self) -> Result<(), ClientError> {
        match self.api.get_guide().await {
            Ok(prompt) => {
                self.prompt = prompt.unwrap_or_default();
                self.error = None;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Save a new prompt and return the toast to show.
    pub async fn save(&mut self, prompt: &str) -> Result<&'static str, ClientError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(self.fail(ValidationError::EmptyGuide.into()));
        }

        match self.api.set_guide(prompt).await {
            Ok(saved) => {
                self.prompt = saved.unwrap_or_else(|| prompt.to_string());
                self.error = None;
                info!("Guide updated ({} chars)", self.prompt.chars().count());
                Ok(GUIDE_SAVED_TOAST)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        if !err.is_auth_required() {
            self.error = Some(err.user_message());
        }
        err
    }
}
