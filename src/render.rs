//! Terminal presentation: localized status text and an observer that prints
//! stage progress the way the browser client shows its status bubbles.

use std::io::{self, Write};

use clap::ValueEnum;
use colored::*;
use serde::{Deserialize, Serialize};

use crate::observer::{SessionEvent, SessionObserver};
use crate::stage::{StageKind, StageResult, StageState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    /// Parse a language tag such as `zh-CN` or `en_US.UTF-8`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let lower = tag.trim().to_ascii_lowercase();
        if lower.starts_with("zh") {
            Some(Locale::Zh)
        } else if lower.starts_with("en") {
            Some(Locale::En)
        } else {
            None
        }
    }

    pub fn text(self, key: Text) -> &'static str {
        use Text::*;
        match (key, self) {
            (GeneratingOutline, Locale::En) => "Generating outline, please wait...",
            (GeneratingOutline, Locale::Zh) => "正在生成大纲，请稍候...",
            (AgentThinking, Locale::En) => "Agent is thinking and planning, please wait...",
            (AgentThinking, Locale::Zh) => "Agent 正在进行思考与规划，请稍后...",
            (GeneratingCode, Locale::En) => "Generating code...",
            (GeneratingCode, Locale::Zh) => "生成代码中...",
            (CodeComplete, Locale::En) => "Code generated",
            (CodeComplete, Locale::Zh) => "代码已完成",
            (OutlineTitle, Locale::En) => "Confirm Animation Outline",
            (OutlineTitle, Locale::Zh) => "动画大纲确认",
            (OutlinePrompt, Locale::En) => "[y] Create from this Outline  [r] Regenerate Outline  [q] Quit",
            (OutlinePrompt, Locale::Zh) => "[y] 就按这个生成动画  [r] 重新生成大纲  [q] 退出",
            (RetryPrompt, Locale::En) => "[y] Retry  [r] Regenerate Outline  [q] Quit",
            (RetryPrompt, Locale::Zh) => "[y] 重试  [r] 重新生成大纲  [q] 退出",
            (Cancelled, Locale::En) => "Generation cancelled.",
            (Cancelled, Locale::Zh) => "已取消生成。",
            (SavedTo, Locale::En) => "Saved as HTML",
            (SavedTo, Locale::Zh) => "已保存为 HTML",
            (ShareLink, Locale::En) => "Share",
            (ShareLink, Locale::Zh) => "分享",
            (GenericError, Locale::En) => "Sorry, something went wrong. Please try again later.",
            (GenericError, Locale::Zh) => "抱歉，服务出现了一点问题。请稍后重试。",
            (ParseError, Locale::En) => {
                "Failed to parse the returned animation code. Please adjust your prompt and try again."
            }
            (ParseError, Locale::Zh) => "返回的动画代码解析失败，请调整提示词重新生成。",
        }
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locale::En => write!(f, "en"),
            Locale::Zh => write!(f, "zh"),
        }
    }
}

/// Catalog keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Text {
    GeneratingOutline,
    AgentThinking,
    GeneratingCode,
    CodeComplete,
    OutlineTitle,
    OutlinePrompt,
    RetryPrompt,
    Cancelled,
    SavedTo,
    ShareLink,
    GenericError,
    ParseError,
}

// ---------------------------------------------------------------------------
// TerminalObserver
// ---------------------------------------------------------------------------

/// Prints status lines to stdout and streams token deltas inline.
pub struct TerminalObserver {
    locale: Locale,
    show_tokens: bool,
}

/// Visual weight of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Status,
    Heading,
    Success,
    Warning,
    Error,
}

impl TerminalObserver {
    pub fn new(locale: Locale) -> Self {
        Self {
            locale,
            show_tokens: true,
        }
    }

    pub fn show_tokens(mut self, show: bool) -> Self {
        self.show_tokens = show;
        self
    }

    /// The status line an event produces, if any.
    pub fn line_for(&self, event: &SessionEvent) -> Option<(Tone, String)> {
        let t = |key| self.locale.text(key).to_string();
        match event {
            SessionEvent::StateChanged {
                stage,
                state: StageState::Requesting,
            } => Some(match stage {
                StageKind::Outline => (Tone::Status, t(Text::GeneratingOutline)),
                StageKind::Animation | StageKind::Combined => (Tone::Status, t(Text::AgentThinking)),
            }),
            SessionEvent::StateChanged {
                stage: StageKind::Animation | StageKind::Combined,
                state: StageState::Streaming,
            } => Some((Tone::Status, t(Text::GeneratingCode))),
            SessionEvent::StateChanged { .. } | SessionEvent::Progress { .. } => None,
            SessionEvent::Finished { result, .. } => Some(match result {
                StageResult::Outline(_) => (Tone::Heading, t(Text::OutlineTitle)),
                StageResult::AnimationArtifact(artifact) => {
                    let id = artifact.id.as_deref().unwrap_or("-");
                    (Tone::Success, format!("{} ({id})", t(Text::CodeComplete)))
                }
                StageResult::Failure(failure) => (Tone::Error, failure.user_message(self.locale)),
                StageResult::Cancelled => (Tone::Warning, t(Text::Cancelled)),
            }),
        }
    }
}

impl SessionObserver for TerminalObserver {
    fn on_event(&self, event: &SessionEvent) {
        if let SessionEvent::Progress { stage, delta, .. } = event {
            if self.show_tokens {
                match stage {
                    StageKind::Outline => print!("{delta}"),
                    StageKind::Animation | StageKind::Combined => print!("{}", delta.dimmed()),
                }
                let _ = io::stdout().flush();
            }
            return;
        }

        let Some((tone, line)) = self.line_for(event) else {
            return;
        };
        if matches!(event, SessionEvent::Finished { .. }) && self.show_tokens {
            println!();
        }
        match tone {
            Tone::Status => println!("{}", line.bright_blue()),
            Tone::Heading => println!("{}", line.bright_yellow().bold()),
            Tone::Success => println!("{}", line.bright_green().bold()),
            Tone::Warning => println!("{}", line.yellow()),
            Tone::Error => eprintln!("{}", line.bright_red().bold()),
        }
    }
}
