use quest_client::{ImageAttachment, ValidationError};

/// Prefix that turns a draft into an image generation request.
pub const GENERATE_COMMAND: &str = "/generate";

/// What a validated draft turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Message {
        text: Option<String>,
        image: Option<ImageAttachment>,
    },
    GenerateImage {
        prompt: String,
    },
}

/// Local input state of the chat box.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    draft: String,
    image: Option<ImageAttachment>,
    sending: bool,
    error: Option<String>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn image(&self) -> Option<&ImageAttachment> {
        self.image.as_ref()
    }

    pub fn attach_image(&mut self, image: ImageAttachment) {
        self.image = Some(image);
    }

    pub fn clear_image(&mut self) {
        self.image = None;
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Validate the draft without touching it.
    pub fn prepare(&self) -> Result<Outgoing, ValidationError> {
        let text = self.draft.trim();

        if let Some(prompt) = generation_prompt(text) {
            if self.image.is_some() {
                return Err(ValidationError::GenerationWithImage);
            }
            if prompt.is_empty() {
                return Err(ValidationError::EmptyGenerationPrompt);
            }
            return Ok(Outgoing::GenerateImage {
                prompt: prompt.to_string(),
            });
        }

        if text.is_empty() && self.image.is_none() {
            return Err(ValidationError::EmptyMessage);
        }

        Ok(Outgoing::Message {
            text: (!text.is_empty()).then(|| text.to_string()),
            image: self.image.clone(),
        })
    }

    /// Mark a send in flight. False if one already is.
    pub fn begin_send(&mut self) -> bool {
        if self.sending {
            return false;
        }
        self.sending = true;
        self.error = None;
        true
    }

    pub fn finish_ok(&mut self) {
        self.sending = false;
        self.draft.clear();
        self.image = None;
        self.error = None;
    }

    /// Keep the draft and image so the user can retry.
    pub fn finish_err(&mut self, message: impl Into<String>) {
        self.sending = false;
        self.error = Some(message.into());
    }
}

/// `Some(prompt)` when `text` is a `/generate` command. The command must be
/// followed by whitespace or nothing, so `/generated` is plain text.
fn generation_prompt(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(GENERATE_COMMAND)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}
