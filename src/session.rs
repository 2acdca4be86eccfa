//! # Session Orchestrator
//!
//! Sequences outline and animation stages for one [`Session`] and exposes the
//! operations a front-end wires to its buttons: `begin`, `confirm`,
//! `regenerate_outline`, `cancel`, `new_session`.
//!
//! One stage runs at a time: every stage-running operation takes `&mut self`.
//! Cancellation from another task goes through a [`CancelHandle`].

use std::sync::{Arc, Mutex};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::GenerationBackend;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::extract::{MarkupValidator, StructuralValidator};
use crate::observer::{ObserverSet, SessionObserver};
use crate::protocol::{ConversationHistory, GenerationRequest, HistoryEntry};
use crate::stage::{AnimationArtifact, StageController, StageKind, StageResult, StageSettings};

/// Which endpoint layout the backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// `/generate-outline` then `/generate-animation`, with a confirmation in
    /// between.
    #[default]
    TwoStage,
    /// Legacy `/generate`: one stage straight to the artifact.
    Combined,
}

/// Everything carried between stages. Replaces page-level globals.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    topic: Option<String>,
    outline: Option<String>,
    artifact: Option<AnimationArtifact>,
    history: ConversationHistory,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: None,
            outline: None,
            artifact: None,
            history: ConversationHistory::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Outline waiting for (or already given) confirmation.
    pub fn outline(&self) -> Option<&str> {
        self.outline.as_deref()
    }

    /// Most recent validated artifact.
    pub fn artifact(&self) -> Option<&AnimationArtifact> {
        self.artifact.as_ref()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels whichever stage is active when [`CancelHandle::cancel`] is called.
/// Cheap to clone and safe to move into a signal handler task.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    active: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if let Ok(token) = self.active.lock() {
            token.cancel();
        }
    }

    /// Install a fresh token for the next stage.
    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut active) = self.active.lock() {
            *active = token.clone();
        }
        token
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<B> {
    backend: B,
    config: SessionConfig,
    validator: Arc<dyn MarkupValidator>,
    observers: ObserverSet,
    session: Session,
    cancel: CancelHandle,
}

impl<B: GenerationBackend> Orchestrator<B> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            validator: Arc::new(StructuralValidator),
            observers: ObserverSet::new(),
            session: Session::new(),
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn MarkupValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn register(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.register(observer);
        debug!(observers = self.observers.len(), "observer registered");
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn mode(&self) -> SessionMode {
        self.config.mode
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drop topic, outline, artifact and history; start over with a new id.
    pub fn new_session(&mut self) {
        self.session = Session::new();
        info!(session = %self.session.id, "new session");
    }

    /// Start generating for `topic`: the outline stage in two-stage mode, the
    /// whole animation in combined mode.
    pub async fn begin(&mut self, topic: &str) -> Result<StageResult, SessionError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(SessionError::EmptyTopic);
        }
        self.session.topic = Some(topic.to_string());
        self.session.outline = None;

        let result = match self.config.mode {
            SessionMode::TwoStage => {
                self.run_stage(StageKind::Outline, GenerationRequest::outline(topic))
                    .await
            }
            SessionMode::Combined => {
                let request = GenerationRequest::combined(topic, &self.session.history);
                self.run_stage(StageKind::Combined, request).await
            }
        };
        Ok(result)
    }

    /// Generate the animation from the held outline.
    pub async fn confirm(&mut self) -> Result<StageResult, SessionError> {
        if self.config.mode == SessionMode::Combined {
            return Err(SessionError::CombinedMode);
        }
        let topic = self.session.topic.clone().ok_or(SessionError::NoTopic)?;
        let outline = self.session.outline.clone().ok_or(SessionError::NoOutline)?;
        let request = GenerationRequest::animation(topic, outline, &self.session.history);
        Ok(self.run_stage(StageKind::Animation, request).await)
    }

    /// Throw away the held outline and generate a new one for the same topic.
    pub async fn regenerate_outline(&mut self) -> Result<StageResult, SessionError> {
        if self.config.mode == SessionMode::Combined {
            return Err(SessionError::CombinedMode);
        }
        let topic = self.session.topic.clone().ok_or(SessionError::NoTopic)?;
        self.session.outline = None;
        Ok(self
            .run_stage(StageKind::Outline, GenerationRequest::outline(topic))
            .await)
    }

    async fn run_stage(&mut self, kind: StageKind, request: GenerationRequest) -> StageResult {
        let token = self.cancel.arm();
        let settings = StageSettings::for_kind(kind, &self.config);
        let mut controller = StageController::new(kind, settings, token, self.observers.clone());
        let result = controller
            .run(&self.backend, &request, self.validator.as_ref())
            .await;
        self.absorb(kind, &result);
        result
    }

    fn absorb(&mut self, kind: StageKind, result: &StageResult) {
        match result {
            StageResult::Outline(text) => {
                self.session.outline = Some(text.clone());
            }
            StageResult::AnimationArtifact(artifact) => {
                self.session.history.push(HistoryEntry::assistant(artifact.raw.clone()));
                self.session.artifact = Some(artifact.clone());
            }
            StageResult::Failure(failure) => {
                warn!(session = %self.session.id, stage = %kind, %failure, "stage failed");
            }
            StageResult::Cancelled => {
                info!(session = %self.session.id, stage = %kind, "stage cancelled");
            }
        }
    }
}
