mod app;
mod cli;
mod commands;
mod interactive;
mod session_file;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use quest_client::{ClientConfig, ClientError};

use crate::app::App;
use crate::cli::{Cli, Command, GuideCommand};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the transcript on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "quest=info,quest_view=info,quest_client=info,quest_realtime=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {}", describe(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    let app = App::new(config, cli.session_file)?;

    let result = dispatch(&app, cli.command).await;
    // Refreshes during the command may have rotated the tokens.
    app.persist()?;
    result
}

async fn dispatch(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login { email, password } => commands::login(app, &email, &password).await,
        Command::Signup { email, password } => commands::signup(app, &email, &password).await,
        Command::Logout => commands::logout(app).await,
        Command::List => commands::list(app).await,
        Command::New { prompt } => commands::new_quest(app, prompt.as_deref()).await,
        Command::Delete { id, yes } => commands::delete(app, id, yes).await,
        Command::Open { id } => commands::open(app, id).await,
        Command::Guide { command: GuideCommand::Show } => commands::guide_show(app).await,
        Command::Guide { command: GuideCommand::Set { prompt } } => commands::guide_set(app, &prompt).await,
    }
}

/// The user-facing line for a failure.
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ClientError>() {
        Some(ClientError::AuthRequired) => {
            format!("{} Run `quest login` first.", ClientError::AuthRequired.user_message())
        }
        Some(e) => e.user_message(),
        None => format!("{:#}", err),
    }
}
