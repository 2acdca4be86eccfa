//! Tests for the stage controller: terminal results, state transitions,
//! error escalation, and cancellation against a scripted backend.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use animagen::error::{FailureKind, GenerationError};
use animagen::extract::StructuralValidator;
use animagen::observer::{ObserverSet, SessionEvent, SessionObserver};
use animagen::protocol::{ConversationHistory, Endpoint, GenerationRequest};
use animagen::stage::{StageController, StageKind, StageResult, StageSettings, StageState};
use animagen::config::SessionConfig;
use animagen::event::EventInterpreter;

use common::{done, sse, token, Recorder, Reply, ScriptedBackend};

const ARTIFACT: &str = "<final_output><div class=\"scene\">sorted</div></final_output>";

fn controller(kind: StageKind, recorder: &Arc<Recorder>) -> (StageController, CancellationToken) {
    let mut observers = ObserverSet::new();
    observers.register(recorder.clone());
    let cancel = CancellationToken::new();
    let settings = StageSettings::for_kind(kind, &SessionConfig::default());
    (StageController::new(kind, settings, cancel.clone(), observers), cancel)
}

fn animation_request() -> GenerationRequest {
    GenerationRequest::animation("bubble sort", "## Outline", &ConversationHistory::new())
}

// ---------------------------------------------------------------------------
// Success paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_outline_stage_accumulates_tokens() {
    let backend = ScriptedBackend::new([Reply::frames(&[
        &token("## Step 1"),
        &token("\n## Step 2"),
        &done(None),
    ])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("bubble sort"), &StructuralValidator)
        .await;

    assert_eq!(result, StageResult::Outline("## Step 1\n## Step 2".into()));
    assert_eq!(stage.state(), StageState::Succeeded);
    assert_eq!(recorder.deltas(), vec!["## Step 1", "\n## Step 2"]);
    assert_eq!(backend.requests()[0].0, Endpoint::Outline);
    assert_eq!(backend.requests()[0].1, serde_json::json!({"topic": "bubble sort"}));
}

#[tokio::test]
async fn test_animation_stage_yields_artifact_with_id() {
    let backend = ScriptedBackend::new([Reply::frames(&[
        &token("thinking... "),
        &token(ARTIFACT),
        &done(Some("abc123")),
    ])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Animation, &recorder);

    let result = stage.run(&backend, &animation_request(), &StructuralValidator).await;

    let StageResult::AnimationArtifact(artifact) = result else {
        panic!("expected artifact, got {result:?}");
    };
    assert_eq!(artifact.html, "<div class=\"scene\">sorted</div>");
    assert_eq!(artifact.id.as_deref(), Some("abc123"));
    assert_eq!(artifact.raw, format!("thinking... {ARTIFACT}"));
}

#[tokio::test]
async fn test_state_sequence_on_success() {
    let backend = ScriptedBackend::new([Reply::frames(&[&token(ARTIFACT), &done(None)])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Animation, &recorder);

    stage.run(&backend, &animation_request(), &StructuralValidator).await;

    assert_eq!(
        recorder.states(),
        vec![
            StageState::Requesting,
            StageState::Streaming,
            StageState::Finalizing,
            StageState::Succeeded,
        ]
    );
    assert_eq!(recorder.finished_count(), 1);
}

#[tokio::test]
async fn test_frames_after_done_are_ignored() {
    let backend = ScriptedBackend::new([Reply::frames(&[
        &token("a"),
        &done(None),
        &token("b"),
        r#"{"error":"late"}"#,
    ])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    assert_eq!(result, StageResult::Outline("a".into()));
    assert_eq!(recorder.deltas(), vec!["a"]);
}

#[tokio::test]
async fn test_frames_split_across_fragments() {
    let body = sse(&[&token("hello "), &token("world"), &done(None)]);
    let chunks: Vec<Vec<u8>> = body.chunks(3).map(<[u8]>::to_vec).collect();
    let backend = ScriptedBackend::new([Reply::Chunks(chunks)]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    assert_eq!(result, StageResult::Outline("hello world".into()));
}

#[tokio::test]
async fn test_unknown_and_empty_records_are_skipped() {
    let backend = ScriptedBackend::new([Reply::frames(&[
        r#"{"status":"warming up"}"#,
        &token(""),
        "not json at all",
        &token("x"),
        &done(None),
    ])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    assert_eq!(result, StageResult::Outline("x".into()));
    assert_eq!(recorder.deltas(), vec!["x"]);
}

#[tokio::test]
async fn test_run_twice_returns_stored_result() {
    let backend = ScriptedBackend::new([Reply::frames(&[&token("o"), &done(None)])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);
    let request = GenerationRequest::outline("t");

    let first = stage.run(&backend, &request, &StructuralValidator).await;
    let second = stage.run(&backend, &request, &StructuralValidator).await;

    assert_eq!(first, second);
    assert_eq!(backend.requests().len(), 1);
    assert_eq!(recorder.finished_count(), 1);
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stream_without_done_is_incomplete() {
    let backend = ScriptedBackend::new([Reply::frames(&[&token("## Bubble sort"), &token(" outline")])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("bubble sort"), &StructuralValidator)
        .await;

    assert_eq!(result.failure().map(|f| f.kind), Some(FailureKind::IncompleteStream));
    assert_eq!(stage.state(), StageState::Failed(FailureKind::IncompleteStream));
}

#[tokio::test]
async fn test_remote_error_frame_fails_stage() {
    let backend = ScriptedBackend::new([Reply::frames(&[
        &token("partial"),
        r#"{"error":"model overloaded"}"#,
        &done(None),
    ])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Animation, &recorder);

    let result = stage.run(&backend, &animation_request(), &StructuralValidator).await;

    let failure = result.failure().expect("failure");
    assert_eq!(failure.kind, FailureKind::Remote);
    assert_eq!(failure.message, "model overloaded");
}

#[tokio::test]
async fn test_malformed_error_payload_is_escalated() {
    let backend = ScriptedBackend::new([Reply::frames(&["internal error: upstream timeout"])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    let failure = result.failure().expect("failure");
    assert_eq!(failure.kind, FailureKind::Remote);
    assert_eq!(failure.message, "Received error from server: internal error: upstream timeout");
}

#[tokio::test]
async fn test_heuristic_disabled_ignores_malformed_error() {
    let backend = ScriptedBackend::new([Reply::frames(&["oops error", &token("ok"), &done(None)])]);
    let recorder = Recorder::new();
    let mut observers = ObserverSet::new();
    observers.register(recorder.clone());
    let settings = StageSettings {
        interpreter: EventInterpreter::new(),
        error_heuristic: false,
    };
    let mut stage = StageController::new(StageKind::Outline, settings, CancellationToken::new(), observers);

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    assert_eq!(result, StageResult::Outline("ok".into()));
}

#[tokio::test]
async fn test_refused_request_is_transport_failure() {
    let backend = ScriptedBackend::new([Reply::Refuse(GenerationError::Request("connection refused".into()))]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    assert_eq!(result.failure().map(|f| f.kind), Some(FailureKind::Transport));
    assert_eq!(recorder.states(), vec![StageState::Requesting, StageState::Failed(FailureKind::Transport)]);
}

#[tokio::test]
async fn test_status_error_message() {
    let backend = ScriptedBackend::new([Reply::Refuse(GenerationError::Status {
        status: 500,
        body: "boom".into(),
    })]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    let failure = result.failure().expect("failure");
    assert_eq!(failure.kind, FailureKind::Transport);
    assert!(failure.message.contains("status: 500"));
}

#[tokio::test]
async fn test_read_error_mid_stream_is_transport_failure() {
    let backend = ScriptedBackend::new([Reply::Broken(vec![sse(&[&token("a")])])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    assert_eq!(result.failure().map(|f| f.kind), Some(FailureKind::Transport));
}

#[tokio::test]
async fn test_missing_final_output_is_extraction_failure() {
    let backend = ScriptedBackend::new([Reply::frames(&[&token("<div>no wrapper</div>"), &done(None)])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Animation, &recorder);

    let result = stage.run(&backend, &animation_request(), &StructuralValidator).await;

    assert_eq!(result.failure().map(|f| f.kind), Some(FailureKind::Extraction));
}

#[tokio::test]
async fn test_broken_markup_is_validation_failure() {
    let backend = ScriptedBackend::new([Reply::frames(&[
        &token("<final_output><div></span></final_output>"),
        &done(None),
    ])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Animation, &recorder);

    let result = stage.run(&backend, &animation_request(), &StructuralValidator).await;

    assert_eq!(result.failure().map(|f| f.kind), Some(FailureKind::Validation));
}

// ---------------------------------------------------------------------------
// Combined stage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_combined_stage_accepts_literal_sentinel() {
    let backend = ScriptedBackend::new([Reply::frames(&[&token(ARTIFACT), "[DONE]"])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Combined, &recorder);

    let result = stage
        .run(
            &backend,
            &GenerationRequest::combined("t", &ConversationHistory::new()),
            &StructuralValidator,
        )
        .await;

    assert!(matches!(result, StageResult::AnimationArtifact(_)));
    assert_eq!(backend.requests()[0].0, Endpoint::Combined);
}

#[tokio::test]
async fn test_sentinel_inside_token_text_is_not_terminal() {
    let backend = ScriptedBackend::new([Reply::frames(&[&token("print('[DONE]')")])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Combined, &recorder);

    let result = stage
        .run(
            &backend,
            &GenerationRequest::combined("t", &ConversationHistory::new()),
            &StructuralValidator,
        )
        .await;

    assert_eq!(result.failure().map(|f| f.kind), Some(FailureKind::IncompleteStream));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cancels the stage as soon as the first token arrives.
struct CancelOnFirstToken(CancellationToken);

impl SessionObserver for CancelOnFirstToken {
    fn on_event(&self, event: &SessionEvent) {
        if matches!(event, SessionEvent::Progress { .. }) {
            self.0.cancel();
        }
    }
}

#[tokio::test]
async fn test_cancel_mid_chunk_wins_over_done() {
    // Done arrives in the same fragment as the token that triggered the cancel.
    let backend = ScriptedBackend::new([Reply::frames(&[&token(ARTIFACT), &done(Some("x"))])]);
    let recorder = Recorder::new();
    let cancel = CancellationToken::new();
    let mut observers = ObserverSet::new();
    observers.register(recorder.clone());
    observers.register(Arc::new(CancelOnFirstToken(cancel.clone())));
    let mut stage = StageController::new(StageKind::Animation, StageSettings::default(), cancel, observers);

    let result = stage.run(&backend, &animation_request(), &StructuralValidator).await;

    assert_eq!(result, StageResult::Cancelled);
    assert_eq!(stage.state(), StageState::Cancelled);
    assert!(stage.buffer().is_empty());
    assert!(!recorder.states().contains(&StageState::Finalizing));
}

#[tokio::test]
async fn test_cancel_while_stream_is_idle() {
    let backend = ScriptedBackend::new([Reply::Hang(vec![sse(&[&token("partial")])])]);
    let recorder = Recorder::new();
    let (mut stage, cancel) = controller(StageKind::Outline, &recorder);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        stage.run(&backend, &GenerationRequest::outline("t"), &StructuralValidator),
    )
    .await
    .expect("stage did not observe cancellation");
    canceller.await.unwrap();

    assert_eq!(result, StageResult::Cancelled);
    assert_eq!(recorder.finished_count(), 1);
}

#[tokio::test]
async fn test_cancel_while_request_is_pending() {
    let backend = ScriptedBackend::new([Reply::Stall]);
    let recorder = Recorder::new();
    let (mut stage, cancel) = controller(StageKind::Outline, &recorder);
    cancel.cancel();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        stage.run(&backend, &GenerationRequest::outline("t"), &StructuralValidator),
    )
    .await
    .expect("stage did not observe cancellation");

    assert_eq!(result, StageResult::Cancelled);
    assert_eq!(recorder.states(), vec![StageState::Requesting, StageState::Cancelled]);
}

// ---------------------------------------------------------------------------
// Stream release and progress snapshots
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stream_released_after_cancel() {
    let (reply, released) = Reply::Hang(vec![sse(&[&token("partial")])]).tracked();
    let backend = ScriptedBackend::new([reply]);
    let recorder = Recorder::new();
    let (mut stage, cancel) = controller(StageKind::Outline, &recorder);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        stage.run(&backend, &GenerationRequest::outline("t"), &StructuralValidator),
    )
    .await
    .expect("stage did not observe cancellation");

    assert_eq!(result, StageResult::Cancelled);
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stream_released_after_remote_error() {
    let (reply, released) =
        Reply::Hang(vec![sse(&[&token("a"), r#"{"error":"model overloaded"}"#])]).tracked();
    let backend = ScriptedBackend::new([reply]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Animation, &recorder);

    let result = stage.run(&backend, &animation_request(), &StructuralValidator).await;

    assert_eq!(result.failure().map(|f| f.kind), Some(FailureKind::Remote));
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stream_released_after_done_with_frames_left() {
    let (reply, released) =
        Reply::Hang(vec![sse(&[&token(ARTIFACT), &done(None), &token("trailing")])]).tracked();
    let backend = ScriptedBackend::new([reply]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Animation, &recorder);

    let result = stage.run(&backend, &animation_request(), &StructuralValidator).await;

    assert!(result.is_success());
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stream_released_after_read_error() {
    let (reply, released) = Reply::Broken(vec![sse(&[&token("a")])]).tracked();
    let backend = ScriptedBackend::new([reply]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    assert_eq!(result.failure().map(|f| f.kind), Some(FailureKind::Transport));
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_progress_snapshots_are_not_mutated_by_later_tokens() {
    let backend = ScriptedBackend::new([Reply::frames(&[&token("a"), &token("b"), &token("c"), &done(None)])]);
    let recorder = Recorder::new();
    let (mut stage, _) = controller(StageKind::Outline, &recorder);

    stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    let buffers: Vec<String> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::Progress { buffer, .. } => Some(buffer.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(buffers, vec!["a", "ab", "abc"]);
}

#[tokio::test]
async fn test_stage_without_observers_still_accumulates() {
    let backend = ScriptedBackend::new([Reply::frames(&[&token("x"), &token("y"), &done(None)])]);
    let mut stage = StageController::new(
        StageKind::Outline,
        StageSettings::default(),
        CancellationToken::new(),
        ObserverSet::new(),
    );

    let result = stage
        .run(&backend, &GenerationRequest::outline("t"), &StructuralValidator)
        .await;

    assert_eq!(result, StageResult::Outline("xy".into()));
}
