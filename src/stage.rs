//! # Stage Controller
//!
//! ## Responsibility
//! Runs one request/stream/result cycle: issues the request, feeds the
//! response through the [`FrameDecoder`] and [`EventInterpreter`], owns the
//! accumulation buffer, and resolves into exactly one terminal
//! [`StageResult`].
//!
//! ## States
//! `Idle → Requesting → Streaming → Finalizing → {Succeeded, Failed, Cancelled}`.
//! Terminal states are absorbing: running a finished controller again returns
//! the stored result without touching the backend.
//!
//! ## Guarantees
//! - Frames are interpreted strictly in arrival order.
//! - Frames after the terminal marker are never interpreted.
//! - Cancellation is observed while awaiting the request, while awaiting each
//!   fragment, and before each frame; once observed no result other than
//!   `Cancelled` is produced.
//! - The response stream is dropped on every exit path.

use std::sync::Arc;

use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backend::GenerationBackend;
use crate::config::SessionConfig;
use crate::error::{Failure, FailureKind, GenerationError};
use crate::event::{escalated_message, is_error_signature, EventInterpreter, GenerationEvent};
use crate::extract::{extract_artifact, MarkupValidator};
use crate::frame::FrameDecoder;
use crate::observer::{ObserverSet, SessionEvent};
use crate::protocol::{AnimationBody, CombinedBody, Endpoint, GenerationRequest, OutlineBody};

// ---------------------------------------------------------------------------
// Stage kinds, states, results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Outline,
    Animation,
    /// Legacy single-request stage: outline and animation in one stream.
    Combined,
}

impl StageKind {
    pub fn endpoint(self) -> Endpoint {
        match self {
            StageKind::Outline => Endpoint::Outline,
            StageKind::Animation => Endpoint::Animation,
            StageKind::Combined => Endpoint::Combined,
        }
    }

    /// Whether the buffer must go through the result extractor.
    pub fn produces_artifact(self) -> bool {
        !matches!(self, StageKind::Outline)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Outline => write!(f, "outline"),
            StageKind::Animation => write!(f, "animation"),
            StageKind::Combined => write!(f, "combined"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Idle,
    Requesting,
    Streaming,
    Finalizing,
    Succeeded,
    Failed(FailureKind),
    Cancelled,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Failed(_) | StageState::Cancelled
        )
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageState::Idle => write!(f, "idle"),
            StageState::Requesting => write!(f, "requesting"),
            StageState::Streaming => write!(f, "streaming"),
            StageState::Finalizing => write!(f, "finalizing"),
            StageState::Succeeded => write!(f, "succeeded"),
            StageState::Failed(kind) => write!(f, "failed({kind})"),
            StageState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Validated markup produced by an animation or combined stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnimationArtifact {
    /// Contents of the `<final_output>` block.
    pub html: String,
    /// Identifier from the done record, when the backend sent one.
    pub id: Option<String>,
    /// Full token text the artifact was extracted from.
    pub raw: String,
}

impl AnimationArtifact {
    /// `<base>/view/<id>` share link.
    pub fn share_url(&self, base: &str) -> Option<String> {
        let id = self.id.as_deref()?;
        Some(format!("{}/view/{id}", base.trim_end_matches('/')))
    }
}

/// File name used when saving an artifact for `topic`.
pub fn artifact_file_name(topic: &str) -> String {
    let stem: String = topic
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if stem.is_empty() {
        "animation.html".to_string()
    } else {
        format!("{stem}.html")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum StageResult {
    Outline(String),
    AnimationArtifact(AnimationArtifact),
    Failure(Failure),
    Cancelled,
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Outline(_) | StageResult::AnimationArtifact(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            StageResult::Failure(f) => Some(f),
            _ => None,
        }
    }

    fn terminal_state(&self) -> StageState {
        match self {
            StageResult::Outline(_) | StageResult::AnimationArtifact(_) => StageState::Succeeded,
            StageResult::Failure(f) => StageState::Failed(f.kind),
            StageResult::Cancelled => StageState::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Per-stage protocol behaviour.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub interpreter: EventInterpreter,
    pub error_heuristic: bool,
}

impl StageSettings {
    /// The combined stage recognizes the literal sentinel; the two-stage
    /// endpoints send structured done records only.
    pub fn for_kind(kind: StageKind, config: &SessionConfig) -> Self {
        let interpreter = match kind {
            StageKind::Combined => EventInterpreter::with_sentinel(config.combined_sentinel.clone()),
            StageKind::Outline | StageKind::Animation => EventInterpreter::new(),
        };
        Self {
            interpreter,
            error_heuristic: config.error_heuristic,
        }
    }
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            interpreter: EventInterpreter::new(),
            error_heuristic: true,
        }
    }
}

// ---------------------------------------------------------------------------
// StageController
// ---------------------------------------------------------------------------

pub struct StageController {
    kind: StageKind,
    settings: StageSettings,
    cancel: CancellationToken,
    observers: ObserverSet,
    state: StageState,
    topic: String,
    buffer: Arc<String>,
    result: Option<StageResult>,
}

impl StageController {
    pub fn new(
        kind: StageKind,
        settings: StageSettings,
        cancel: CancellationToken,
        observers: ObserverSet,
    ) -> Self {
        Self {
            kind,
            settings,
            cancel,
            observers,
            state: StageState::Idle,
            topic: String::new(),
            buffer: Arc::default(),
            result: None,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Accumulated token text. Empty after cancellation.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Drive the stage to its terminal result.
    pub async fn run<B: GenerationBackend>(
        &mut self,
        backend: &B,
        request: &GenerationRequest,
        validator: &dyn MarkupValidator,
    ) -> StageResult {
        if self.state.is_terminal() {
            if let Some(result) = &self.result {
                debug!(stage = %self.kind, state = %self.state, "stage already finished");
                return result.clone();
            }
        }
        self.topic = request.topic.clone();
        info!(stage = %self.kind, topic = %self.topic, "starting stage");
        let result = self.drive(backend, request, validator).await;
        self.finish(result)
    }

    async fn drive<B: GenerationBackend>(
        &mut self,
        backend: &B,
        request: &GenerationRequest,
        validator: &dyn MarkupValidator,
    ) -> StageResult {
        self.transition(StageState::Requesting);

        let body = match request_body(self.kind, request) {
            Ok(body) => body,
            Err(e) => return StageResult::Failure(Failure::transport(&e)),
        };

        let cancel = self.cancel.clone();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StageResult::Cancelled,
            opened = backend.open(self.kind.endpoint(), body) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(stage = %self.kind, error = %e, "could not open stream");
                return StageResult::Failure(Failure::transport(&e));
            }
        };

        let mut decoder = FrameDecoder::new();
        let mut done: Option<Option<String>> = None;

        'read: loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StageResult::Cancelled,
                next = stream.next() => next,
            };
            let fragment = match next {
                Some(Ok(fragment)) => fragment,
                Some(Err(e)) => {
                    warn!(stage = %self.kind, error = %e, "stream read failed");
                    return StageResult::Failure(Failure::transport(&e));
                }
                None => break,
            };
            if self.state == StageState::Requesting {
                self.transition(StageState::Streaming);
            }

            for frame in decoder.push_bytes(&fragment) {
                if cancel.is_cancelled() {
                    return StageResult::Cancelled;
                }
                match self.settings.interpreter.interpret(frame.payload()) {
                    GenerationEvent::Token(token) => self.append(&token),
                    GenerationEvent::Done { animation_id } => {
                        done = Some(animation_id);
                        break 'read;
                    }
                    GenerationEvent::Error(message) => {
                        warn!(stage = %self.kind, %message, "backend reported an error");
                        return StageResult::Failure(Failure::remote(message));
                    }
                    GenerationEvent::Malformed(raw) => {
                        if self.settings.error_heuristic && is_error_signature(&raw) {
                            warn!(stage = %self.kind, payload = %raw, "malformed error frame");
                            return StageResult::Failure(Failure::remote(escalated_message(&raw)));
                        }
                        debug!(stage = %self.kind, payload = %raw, "ignoring malformed frame");
                    }
                    GenerationEvent::Unknown(raw) => {
                        debug!(stage = %self.kind, payload = %raw, "ignoring unrecognized record");
                    }
                }
            }
        }

        let Some(animation_id) = done else {
            if let Some(rest) = decoder.finish() {
                debug!(stage = %self.kind, bytes = rest.len(), "discarding incomplete final frame");
            }
            warn!(stage = %self.kind, "stream closed before the terminal marker");
            return StageResult::Failure(Failure::incomplete_stream());
        };
        trace!(
            stage = %self.kind,
            buffered = decoder.remainder().len(),
            "terminal marker received; ignoring the rest of the stream"
        );
        drop(stream);

        if cancel.is_cancelled() {
            return StageResult::Cancelled;
        }
        self.transition(StageState::Finalizing);

        if !self.kind.produces_artifact() {
            return StageResult::Outline(self.buffer.to_string());
        }
        match extract_artifact(&self.buffer, validator) {
            Ok(html) => StageResult::AnimationArtifact(AnimationArtifact {
                html,
                id: animation_id,
                raw: self.buffer.to_string(),
            }),
            Err(e) => {
                warn!(stage = %self.kind, error = %e, "artifact extraction failed");
                StageResult::Failure(Failure::extraction(&e))
            }
        }
    }

    fn append(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        // in place unless an observer kept the previous snapshot
        Arc::make_mut(&mut self.buffer).push_str(token);
        if self.observers.is_empty() {
            return;
        }
        self.observers.notify(&SessionEvent::Progress {
            topic: self.topic.clone(),
            stage: self.kind,
            delta: token.to_string(),
            buffer: Arc::clone(&self.buffer),
        });
    }

    fn transition(&mut self, next: StageState) {
        debug!(stage = %self.kind, from = %self.state, to = %next, "stage transition");
        self.state = next;
        self.observers.notify(&SessionEvent::StateChanged {
            stage: self.kind,
            state: next,
        });
    }

    fn finish(&mut self, result: StageResult) -> StageResult {
        if matches!(result, StageResult::Cancelled) {
            self.buffer = Arc::default();
        }
        self.transition(result.terminal_state());
        info!(stage = %self.kind, state = %self.state, "stage finished");
        self.observers.notify(&SessionEvent::Finished {
            stage: self.kind,
            result: result.clone(),
        });
        self.result = Some(result.clone());
        result
    }
}

/// Serialize the endpoint-specific body for `request`.
pub fn request_body(
    kind: StageKind,
    request: &GenerationRequest,
) -> Result<serde_json::Value, GenerationError> {
    let topic = request.topic.as_str();
    let body = match kind {
        StageKind::Outline => serde_json::to_value(OutlineBody { topic }),
        StageKind::Animation => serde_json::to_value(AnimationBody {
            topic,
            outline: request.outline.as_deref().unwrap_or_default(),
            history: &request.history,
        }),
        StageKind::Combined => serde_json::to_value(CombinedBody {
            topic,
            history: &request.history,
        }),
    };
    body.map_err(|e| GenerationError::Request(e.to_string()))
}
