use std::path::PathBuf;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use quest_client::ImageAttachment;
use quest_realtime::RealtimeTransport;
use quest_types::Message;
use quest_view::{QuestView, Route, ViewCommand, ViewUpdate};

use crate::app::App;

/// One line typed at the chat prompt.
#[derive(Debug, PartialEq)]
pub enum Input {
    Quit,
    Delete,
    Help,
    Suggestion(usize),
    Image { path: PathBuf, text: Option<String> },
    Text(String),
    Nothing,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Nothing;
    }
    let Some(command) = line.strip_prefix(':') else {
        return Input::Text(line.to_string());
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "quit" | "q" => Input::Quit,
        "delete" => Input::Delete,
        "help" | "h" => Input::Help,
        "s" => rest.parse().map(Input::Suggestion).unwrap_or(Input::Help),
        "img" if !rest.is_empty() => {
            let (path, text) = match rest.split_once(char::is_whitespace) {
                Some((path, text)) => (path, Some(text.trim().to_string())),
                None => (rest, None),
            };
            Input::Image {
                path: PathBuf::from(path),
                text: text.filter(|t| !t.is_empty()),
            }
        }
        _ => Input::Help,
    }
}

const HELP: &str = "\
Type a message and press enter to send it. /generate <prompt> asks for an image.
  :img <path> [text]  send an image, optionally with text
  :s <n>              send suggestion n
  :delete             delete this quest
  :quit               leave";

pub fn format_message(message: &Message) -> String {
    let mut out = format!(
        "[{}] {}: {}",
        message.created_at.with_timezone(&Local).format("%H:%M"),
        message.role.label(),
        message.text()
    );
    for url in message.image_urls() {
        out.push_str(&format!("\n    [image] {}", url));
    }
    out
}

enum Flow {
    Continue,
    Exit,
}

/// Open a quest and chat until `:quit`, end of input, or the view navigates
/// away.
pub async fn run<T: RealtimeTransport + 'static>(app: &App, quest_id: Uuid, transport: T) -> anyhow::Result<()> {
    let (mut view, mut updates) = QuestView::new(app.api.clone(), transport);
    if let Some(images) = app.image_store() {
        view = view.with_image_store(images);
    }
    let (commands, task) = view.spawn();
    commands.send(ViewCommand::Open(quest_id)).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut suggestions: Vec<String> = Vec::new();
    let mut confirming_delete = false;

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                if let Flow::Exit = render(update, &mut suggestions, &mut confirming_delete) {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };

                if confirming_delete {
                    confirming_delete = false;
                    let answer = line.trim().to_ascii_lowercase();
                    let command = if answer == "y" || answer == "yes" {
                        ViewCommand::ConfirmDelete
                    } else {
                        println!("Kept.");
                        ViewCommand::CancelDelete
                    };
                    commands.send(command).await?;
                    continue;
                }

                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Nothing => {}
                    Input::Help => println!("{}", HELP),
                    Input::Delete => commands.send(ViewCommand::RequestDelete).await?,
                    Input::Suggestion(n) => match n.checked_sub(1).and_then(|i| suggestions.get(i)) {
                        Some(text) => commands.send(ViewCommand::ClickSuggestion(text.clone())).await?,
                        None => println!("No suggestion {}.", n),
                    },
                    Input::Image { path, text } => match ImageAttachment::from_path(&path).await {
                        Ok(image) => {
                            commands.send(ViewCommand::AttachImage(image)).await?;
                            commands.send(ViewCommand::SetDraft(text.unwrap_or_default())).await?;
                            commands.send(ViewCommand::Send).await?;
                        }
                        Err(e) => eprintln!("error: {}", e.user_message()),
                    },
                    Input::Text(text) => {
                        commands.send(ViewCommand::SetDraft(text)).await?;
                        commands.send(ViewCommand::Send).await?;
                    }
                }
            }
        }
    }

    let _ = commands.send(ViewCommand::Shutdown).await;
    if let Err(e) = task.await {
        debug!("Quest view task ended abnormally: {}", e);
    }
    Ok(())
}

fn render(update: ViewUpdate, suggestions: &mut Vec<String>, confirming_delete: &mut bool) -> Flow {
    match update {
        ViewUpdate::Loaded(detail) => {
            println!("── {} ──", detail.quest.display_title());
            for message in &detail.messages {
                println!("{}", format_message(message));
            }
            println!("(:help for commands)");
        }
        ViewUpdate::MessageAppended(message) => println!("{}", format_message(&message)),
        ViewUpdate::Responding(true) => println!("guide is thinking..."),
        ViewUpdate::Suggestions(list) => {
            if !list.is_empty() {
                for (i, text) in list.iter().enumerate() {
                    println!("  [{}] {}", i + 1, text);
                }
            }
            *suggestions = list;
        }
        ViewUpdate::Error(message) => eprintln!("error: {}", message),
        ViewUpdate::NotFound(message) => {
            eprintln!("error: {}", message);
            return Flow::Exit;
        }
        ViewUpdate::DeleteConfirmationRequired => {
            *confirming_delete = true;
            println!("Delete this quest and its whole transcript? [y/N]");
        }
        ViewUpdate::Toast(message) => println!("{}", message),
        ViewUpdate::AuthRequired => eprintln!("error: sign-in required. Run `quest login` first."),
        ViewUpdate::Navigate(Route::QuestList | Route::SignIn) => return Flow::Exit,
        ViewUpdate::Navigate(Route::Quest(_))
        | ViewUpdate::Responding(false)
        | ViewUpdate::TranscriptChanged
        | ViewUpdate::ComposerChanged
        | ViewUpdate::Deleted => {}
    }
    Flow::Continue
}
