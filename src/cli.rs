use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::render::Locale;
use crate::session::SessionMode;

#[derive(Parser, Debug)]
#[command(name = "animagen")]
#[command(version)]
#[command(about = "Turn a topic into an animated HTML explainer, streamed from a generation backend")]
pub struct Args {
    /// Topic to animate (e.g. "bubble sort")
    pub topic: String,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides config and ANIMAGEN_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Endpoint layout: two-stage (outline, then animation) or combined
    #[arg(long, value_enum)]
    pub mode: Option<SessionMode>,

    /// Language for status and error messages
    #[arg(long, value_enum)]
    pub lang: Option<Locale>,

    /// Accept the first outline without asking
    #[arg(long, short)]
    pub yes: bool,

    /// Where to save the generated HTML (defaults to <topic>.html)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Origin for share links (defaults to the backend base URL)
    #[arg(long)]
    pub share_base: Option<String>,

    /// Do not echo streamed tokens
    #[arg(long, short)]
    pub quiet: bool,
}

impl Args {
    /// Flags win over file and environment.
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.base_url {
            config.backend.base_url = url.clone();
        }
        if let Some(share) = &self.share_base {
            config.backend.share_base = Some(share.clone());
        }
        if let Some(mode) = self.mode {
            config.session.mode = mode;
        }
        if let Some(lang) = self.lang {
            config.session.language = lang;
        }
    }
}

/// Answer to the outline confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Confirm,
    Regenerate,
    Quit,
}

impl Choice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "" | "y" | "yes" => Some(Choice::Confirm),
            "r" | "regenerate" => Some(Choice::Regenerate),
            "q" | "quit" | "n" | "no" => Some(Choice::Quit),
            _ => None,
        }
    }
}
