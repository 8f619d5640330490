use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "quest", about = "Chat with your guide from the terminal", version)]
pub struct Cli {
    /// Backend base URL (overrides QUEST_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<Url>,

    /// Where the signed-in session is kept between runs
    #[arg(long, global = true, env = "QUEST_SESSION_FILE", default_value = ".quest_session.json")]
    pub session_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign out and forget the saved session
    Logout,
    /// List your quests, most recent first
    List,
    /// Start a new quest
    New {
        /// First thing to ask; also seeds the title
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Delete a quest and its whole transcript
    Delete {
        id: Uuid,
        /// Skip the confirmation question
        #[arg(long)]
        yes: bool,
    },
    /// Open a quest and chat with live updates
    Open { id: Uuid },
    /// Show or change your guide's persona
    Guide {
        #[command(subcommand)]
        command: GuideCommand,
    },
}

#[derive(Subcommand)]
pub enum GuideCommand {
    Show,
    Set { prompt: String },
}
