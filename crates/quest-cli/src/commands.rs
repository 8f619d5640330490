use anyhow::{anyhow, bail};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use uuid::Uuid;

use quest_client::{ClientError, SignUpOutcome};
use quest_realtime::LocalHub;
use quest_types::Quest;
use quest_view::{GuideEditor, QuestList, QuestView, ViewCommand, ViewUpdate};

use crate::app::App;
use crate::interactive;

pub async fn login(app: &App, email: &str, password: &str) -> anyhow::Result<()> {
    let session = app.auth()?.sign_in_with_password(email, password).await?;
    println!("Signed in as {}.", session.email.as_deref().unwrap_or(email));
    Ok(())
}

pub async fn signup(app: &App, email: &str, password: &str) -> anyhow::Result<()> {
    match app.auth()?.sign_up(email, password).await? {
        SignUpOutcome::SignedIn(_) => println!("Account created. You are signed in."),
        SignUpOutcome::ConfirmationSent => {
            println!("Check {} for a confirmation link, then run `quest login`.", email)
        }
    }
    Ok(())
}

pub async fn logout(app: &App) -> anyhow::Result<()> {
    app.sessions().sign_out().await?;
    app.forget_saved()?;
    println!("Signed out.");
    Ok(())
}

pub async fn list(app: &App) -> anyhow::Result<()> {
    let mut quests = QuestList::new(app.api.clone());
    quests.refresh().await?;

    if quests.quests().is_empty() {
        println!("No quests yet. Start one with `quest new`.");
        return Ok(());
    }
    for quest in quests.quests() {
        println!("{}", format_quest(quest));
    }
    Ok(())
}

pub fn format_quest(quest: &Quest) -> String {
    let count = match quest.message_count {
        Some(1) => "1 message".to_string(),
        Some(n) => format!("{} messages", n),
        None => String::new(),
    };
    format!(
        "{}  {:<40}  {:>12}  {}",
        quest.id,
        quest.display_title(),
        count,
        quest.last_updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
    )
    .trim_end()
    .to_string()
}

pub async fn new_quest(app: &App, prompt: Option<&str>) -> anyhow::Result<()> {
    let mut quests = QuestList::new(app.api.clone());
    let quest = quests.create(prompt).await?;
    if let Some(error) = quests.error() {
        eprintln!("warning: the quest was created but its first message was not sent: {}", error);
    }
    println!("Created {}  {}", quest.id, quest.display_title());
    println!("Open it with `quest open {}`.", quest.id);
    Ok(())
}

/// Deletes through the quest view so the CLI follows the same confirm,
/// delete, toast sequence as an interactive session.
pub async fn delete(app: &App, quest_id: Uuid, yes: bool) -> anyhow::Result<()> {
    if !yes && !confirm(&format!("Delete quest {} and its whole transcript? [y/N] ", quest_id)).await? {
        println!("Kept.");
        return Ok(());
    }

    let (view, mut updates) = QuestView::new(app.api.clone(), LocalHub::new());
    let (commands, task) = view.spawn();
    commands.send(ViewCommand::Open(quest_id)).await?;

    let result = loop {
        let Some(update) = updates.recv().await else {
            break Err(anyhow!("the quest view stopped unexpectedly"));
        };
        match update {
            ViewUpdate::Loaded(_) => commands.send(ViewCommand::RequestDelete).await?,
            ViewUpdate::DeleteConfirmationRequired => commands.send(ViewCommand::ConfirmDelete).await?,
            ViewUpdate::Toast(message) => {
                println!("{}", message);
                break Ok(());
            }
            ViewUpdate::NotFound(message) | ViewUpdate::Error(message) => break Err(anyhow!(message)),
            ViewUpdate::AuthRequired => break Err(ClientError::AuthRequired.into()),
            _ => {}
        }
    };

    let _ = commands.send(ViewCommand::Shutdown).await;
    let _ = task.await;
    if result.is_ok() {
        info!("Deleted quest {}", quest_id);
    }
    result
}

pub async fn open(app: &App, quest_id: Uuid) -> anyhow::Result<()> {
    match app.transport() {
        Some(transport) => interactive::run(app, quest_id, transport).await,
        None => {
            eprintln!("note: no realtime endpoint configured; replies will not appear live.");
            interactive::run(app, quest_id, LocalHub::new()).await
        }
    }
}

pub async fn guide_show(app: &App) -> anyhow::Result<()> {
    let mut guide = GuideEditor::new(app.api.clone());
    guide.load().await?;
    if guide.prompt().is_empty() {
        println!("(no custom guide set)");
    } else {
        println!("{}", guide.prompt());
    }
    Ok(())
}

pub async fn guide_set(app: &App, prompt: &str) -> anyhow::Result<()> {
    let mut guide = GuideEditor::new(app.api.clone());
    let toast = guide.save(prompt).await?;
    println!("{}", toast);
    Ok(())
}

async fn confirm(question: &str) -> anyhow::Result<bool> {
    use std::io::Write;

    print!("{}", question);
    std::io::stdout().flush()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let Some(answer) = lines.next_line().await? else {
        bail!("no answer on stdin; pass --yes to skip the question");
    };
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn quest(title: Option<&str>, count: Option<i64>) -> Quest {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        Quest {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: title.map(String::from),
            created_at: at,
            last_updated_at: at,
            message_count: count,
        }
    }

    #[test]
    fn quest_line_has_id_title_and_count() {
        let q = quest(Some("Rome trip"), Some(4));
        let line = format_quest(&q);
        assert!(line.starts_with(&q.id.to_string()));
        assert!(line.contains("Rome trip"));
        assert!(line.contains("4 messages"));
    }

    #[test]
    fn untitled_quest_without_count() {
        let line = format_quest(&quest(None, None));
        assert!(line.contains("New Quest"));
        assert!(!line.contains("message"));
        assert!(format_quest(&quest(Some("x"), Some(1))).contains("1 message  "));
    }

    #[test]
    fn confirmation_answers() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES \n"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }
}
