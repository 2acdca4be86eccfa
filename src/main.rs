use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use animagen::cli::{Args, Choice};
use animagen::render::{Locale, TerminalObserver, Text};
use animagen::stage::artifact_file_name;
use animagen::{Config, HttpBackend, Orchestrator, SessionMode, StageResult};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.session.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let locale = config.session.language;
    let share_base = config.backend.share_base().to_string();
    let backend = HttpBackend::new(&config.backend)?;

    let mut orchestrator = Orchestrator::new(backend, config.session.clone());
    orchestrator.register(Arc::new(
        TerminalObserver::new(locale).show_tokens(!args.quiet),
    ));

    // Ctrl-C cancels the active stage; the stage then resolves as cancelled.
    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut result = orchestrator.begin(&args.topic).await?;
    loop {
        match result {
            StageResult::Outline(_) => {
                let choice = if args.yes {
                    Choice::Confirm
                } else {
                    prompt_choice(locale, Text::OutlinePrompt).await?
                };
                result = match choice {
                    Choice::Confirm => orchestrator.confirm().await?,
                    Choice::Regenerate => orchestrator.regenerate_outline().await?,
                    Choice::Quit => return Ok(()),
                };
            }
            StageResult::AnimationArtifact(artifact) => {
                let path = args
                    .output
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(artifact_file_name(&args.topic)));
                tokio::fs::write(&path, &artifact.html).await?;
                println!("{}: {}", locale.text(Text::SavedTo).bright_green(), path.display());
                if let Some(url) = artifact.share_url(&share_base) {
                    println!("{}: {}", locale.text(Text::ShareLink).bright_cyan(), url);
                }
                return Ok(());
            }
            StageResult::Failure(failure) => {
                if args.yes {
                    return Err(format!("{} ({})", failure.user_message(locale), failure.kind).into());
                }
                let combined = orchestrator.mode() == SessionMode::Combined;
                result = match prompt_choice(locale, Text::RetryPrompt).await? {
                    Choice::Quit => return Ok(()),
                    _ if combined => orchestrator.begin(&args.topic).await?,
                    Choice::Confirm if orchestrator.session().outline().is_some() => {
                        orchestrator.confirm().await?
                    }
                    Choice::Confirm | Choice::Regenerate => orchestrator.regenerate_outline().await?,
                };
            }
            StageResult::Cancelled => return Ok(()),
        }
    }
}

/// Show `prompt` until a valid choice is entered. EOF and Ctrl-C quit.
async fn prompt_choice(locale: Locale, prompt: Text) -> std::io::Result<Choice> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("{}", locale.text(prompt).bright_white());
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => return Ok(Choice::Quit),
        };
        let Some(line) = line else {
            return Ok(Choice::Quit);
        };
        if let Some(choice) = Choice::parse(&line) {
            return Ok(choice);
        }
    }
}
