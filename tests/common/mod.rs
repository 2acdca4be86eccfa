//! Shared fixtures: a scripted backend and a recording observer.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;

use animagen::backend::{FragmentStream, GenerationBackend};
use animagen::error::GenerationError;
use animagen::observer::{SessionEvent, SessionObserver};
use animagen::protocol::Endpoint;
use animagen::stage::StageState;

/// One scripted response.
pub enum Reply {
    /// Stream these fragments, then close.
    Chunks(Vec<Vec<u8>>),
    /// Stream these fragments, then stay open forever.
    Hang(Vec<Vec<u8>>),
    /// Stream these fragments, then fail the read.
    Broken(Vec<Vec<u8>>),
    /// Refuse to open with this error.
    Refuse(GenerationError),
    /// Never answer the request.
    Stall,
    /// Like the wrapped streaming reply, but raises the flag once the stream
    /// has been dropped.
    Tracked(Box<Reply>, Arc<AtomicBool>),
}

impl Reply {
    pub fn frames(payloads: &[&str]) -> Self {
        Reply::Chunks(vec![sse(payloads)])
    }

    /// Wrap `self` and return the flag that reports its stream was released.
    pub fn tracked(self) -> (Self, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        (Reply::Tracked(Box::new(self), Arc::clone(&released)), released)
    }
}

struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn stream_for(reply: Reply) -> Option<FragmentStream> {
    let stream: FragmentStream = match reply {
        Reply::Chunks(chunks) => Box::pin(tokio_stream::iter(chunks.into_iter().map(Ok))),
        Reply::Hang(chunks) => Box::pin(
            tokio_stream::iter(chunks.into_iter().map(Ok)).chain(futures_util::stream::pending()),
        ),
        Reply::Broken(chunks) => Box::pin(tokio_stream::iter(
            chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(GenerationError::Read("connection reset".into())))),
        )),
        Reply::Tracked(inner, released) => {
            let guard = ReleaseGuard(released);
            let inner = stream_for(*inner)?;
            Box::pin(inner.map(move |item| {
                let _held = &guard;
                item
            }))
        }
        Reply::Refuse(_) | Reply::Stall => return None,
    };
    Some(stream)
}

/// Encode payloads as `data: ...\n\n` frames.
pub fn sse(payloads: &[&str]) -> Vec<u8> {
    payloads
        .iter()
        .map(|p| format!("data: {p}\n\n"))
        .collect::<String>()
        .into_bytes()
}

pub fn token(text: &str) -> String {
    serde_json::json!({ "token": text }).to_string()
}

pub fn done(id: Option<&str>) -> String {
    match id {
        Some(id) => serde_json::json!({ "event": "done", "animation_id": id }).to_string(),
        None => serde_json::json!({ "event": "done" }).to_string(),
    }
}

#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<(Endpoint, serde_json::Value)>>,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<(Endpoint, serde_json::Value)> {
        self.requests.lock().unwrap().clone()
    }
}

impl GenerationBackend for ScriptedBackend {
    fn open(
        &self,
        endpoint: Endpoint,
        body: serde_json::Value,
    ) -> impl Future<Output = Result<FragmentStream, GenerationError>> + Send {
        self.requests.lock().unwrap().push((endpoint, body));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted reply left");

        async move {
            match reply {
                Reply::Refuse(e) => Err(e),
                Reply::Stall => std::future::pending().await,
                streaming => Ok(stream_for(streaming).expect("streaming reply")),
            }
        }
    }
}

/// Records every event it sees.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<SessionEvent>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<StageState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn deltas(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Progress { delta, .. } => Some(delta),
                _ => None,
            })
            .collect()
    }

    pub fn finished_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SessionEvent::Finished { .. }))
            .count()
    }
}

impl SessionObserver for Recorder {
    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
