use tracing::{info, warn};
use uuid::Uuid;

use quest_client::{ApiClient, ClientError};
use quest_types::{ContentPart, Quest};

/// The signed-in user's quests, most recently active first.
pub struct QuestList {
    api: ApiClient,
    quests: Vec<Quest>,
    error: Option<String>,
}

impl QuestList {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            quests: Vec::new(),
            error: None,
        }
    }

    pub fn quests(&self) -> &[Quest] {
        &self.quests
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub async fn refresh(&mut self) -> Result<(), ClientError> {
        match self.api.list_quests().await {
            Ok(quests) => {
                self.quests = quests;
                sort_newest_first(&mut self.quests);
                self.error = None;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Create a quest. The backend creates it empty, so a non-blank
    /// `initial_prompt` is then posted as its first message.
    pub async fn create(&mut self, initial_prompt: Option<&str>) -> Result<Quest, ClientError> {
        let prompt = initial_prompt.map(str::trim).filter(|p| !p.is_empty());

        let quest = match self.api.create_quest(prompt).await {
            Ok(quest) => quest,
            Err(e) => return Err(self.fail(e)),
        };
        self.error = None;

        if let Some(prompt) = prompt
            && let Err(e) = self.api.send_message(quest.id, vec![ContentPart::text(prompt)]).await
        {
            warn!("Quest {} created but its first message failed: {}", quest.id, e);
            if e.is_auth_required() {
                return Err(e);
            }
            self.error = Some(e.user_message());
        }

        info!("New quest {} ({})", quest.id, quest.display_title());
        self.quests.retain(|q| q.id != quest.id);
        self.quests.push(quest.clone());
        sort_newest_first(&mut self.quests);
        Ok(quest)
    }

    /// Forget a quest deleted elsewhere.
    pub fn remove(&mut self, quest_id: Uuid) {
        self.quests.retain(|q| q.id != quest_id);
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        if !err.is_auth_required() {
            self.error = Some(err.user_message());
        }
        err
    }
}

fn sort_newest_first(quests: &mut [Quest]) {
    quests.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));
}
