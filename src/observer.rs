//! Typed notifications for presentation collaborators.
//!
//! The core never touches a UI. It emits [`SessionEvent`]s to every
//! registered [`SessionObserver`]; observers react and hold no decision logic.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::stage::{StageKind, StageResult, StageState};

/// A notification emitted by a stage controller or the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A stage moved to a new state.
    StateChanged { stage: StageKind, state: StageState },
    /// A token was appended to the stage buffer. `buffer` is a shared
    /// snapshot of everything accumulated so far.
    Progress {
        topic: String,
        stage: StageKind,
        delta: String,
        buffer: Arc<String>,
    },
    /// A stage reached its terminal value.
    Finished { stage: StageKind, result: StageResult },
}

impl SessionEvent {
    pub fn stage(&self) -> StageKind {
        match self {
            SessionEvent::StateChanged { stage, .. }
            | SessionEvent::Progress { stage, .. }
            | SessionEvent::Finished { stage, .. } => *stage,
        }
    }
}

pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Forward events into a channel, like a web front-end would consume them.
impl SessionObserver for mpsc::UnboundedSender<SessionEvent> {
    fn on_event(&self, event: &SessionEvent) {
        // a closed receiver only means nobody is listening any more
        let _ = self.send(event.clone());
    }
}

/// Ordered set of observers; notified in registration order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify(&self, event: &SessionEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}
