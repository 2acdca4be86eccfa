//! Streaming client for a two-stage animation generator.
//!
//! A topic goes to the backend's outline endpoint; once the user confirms the
//! streamed outline, the animation endpoint streams HTML wrapped in
//! `<final_output>` tags. Both responses are `data: <json>\n\n` frames.
//!
//! Leaf to root: [`frame`] reassembles frames from arbitrary byte fragments,
//! [`event`] classifies them, [`extract`] pulls out and checks the artifact,
//! [`stage`] runs one request as a state machine, and [`session`] sequences
//! stages and carries the conversation history.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod extract;
pub mod frame;
pub mod observer;
pub mod protocol;
pub mod render;
pub mod session;
pub mod stage;

pub use backend::{FragmentStream, GenerationBackend, HttpBackend};
pub use config::Config;
pub use error::{Failure, FailureKind, GenerationError, SessionError};
pub use event::{EventInterpreter, GenerationEvent};
pub use extract::{MarkupValidator, StructuralValidator};
pub use frame::{FrameDecoder, StreamFrame};
pub use observer::{ObserverSet, SessionEvent, SessionObserver};
pub use protocol::{ConversationHistory, GenerationRequest, HistoryEntry, Role};
pub use session::{CancelHandle, Orchestrator, Session, SessionMode};
pub use stage::{AnimationArtifact, StageController, StageKind, StageResult, StageSettings, StageState};
