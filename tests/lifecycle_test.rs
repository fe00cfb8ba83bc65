// End-to-end lifecycle tests over the simulated engine
//
// Drives the full controller the way the binary does: build, PLAYING, block,
// stop, ordered teardown. The simulation records every engine operation, so
// ordering and idempotence are asserted on the log rather than on timing.

use std::sync::Arc;
use std::time::Duration;

use nagare::config::StreamSettings;
use nagare::engine::sim::{SimEngine, SimOp};
use nagare::engine::{Message, MessageSource, ObjectId, PipelineState};
use nagare::error::PushError;
use nagare::lifecycle::LifecycleController;
use nagare::pipeline::DECLARED_STAGES;

fn settings() -> StreamSettings {
    StreamSettings {
        url: "rtmp://example/live/x".to_string(),
        width: 640,
        height: 480,
        video_bitrate_kbps: 1000,
        audio_bitrate_kbps: 128,
        ..Default::default()
    }
}

/// Run the controller in a task and hand control back once it is live
async fn spawn_run(
    engine: Arc<SimEngine>,
) -> (
    tokio::task::JoinHandle<(Result<(), PushError>, LifecycleController)>,
    tokio_util::sync::CancellationToken,
) {
    let mut controller = LifecycleController::new(engine.clone(), settings());
    let stop = controller.stop_token();
    let handle = tokio::spawn(async move {
        let result = controller.run().await;
        (result, controller)
    });

    // Wait until the PLAYING request shows up in the operation log.
    for _ in 0..100 {
        if engine.operations().iter().any(|op| {
            matches!(
                op,
                SimOp::SetState {
                    state: PipelineState::Playing
                }
            )
        }) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    (handle, stop)
}

#[tokio::test]
async fn interrupt_runs_ordered_teardown_and_exits_cleanly() {
    let engine = Arc::new(SimEngine::new());
    let (handle, stop) = spawn_run(engine.clone()).await;
    assert!(engine.bus_attached());

    stop.cancel();
    let (result, _controller) = handle.await.unwrap();
    result.unwrap();

    let ops = engine.operations();
    // PLAYING was requested exactly once, NULL exactly once, in that order.
    let playing_at = ops
        .iter()
        .position(|op| matches!(op, SimOp::SetState { state: PipelineState::Playing }))
        .unwrap();
    let null_positions: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter_map(|(i, op)| {
            matches!(op, SimOp::SetState { state: PipelineState::Null }).then_some(i)
        })
        .collect();
    assert_eq!(null_positions.len(), 1);
    assert!(playing_at < null_positions[0]);

    // The pipeline's last reference was dropped and the bus watch detached.
    assert!(!engine.pipeline_alive());
    assert!(!engine.bus_attached());
    assert!(engine.outstanding_request_pads().len() == 2);
}

#[tokio::test]
async fn overlay_timer_is_cancelled_before_the_null_transition() {
    let engine = Arc::new(SimEngine::new());
    let (handle, stop) = spawn_run(engine.clone()).await;

    stop.cancel();
    let (result, _controller) = handle.await.unwrap();
    result.unwrap();

    // The NULL transition is the final engine operation: no overlay write
    // may land after it, even well past the next timer tick.
    let ops_after_shutdown = engine.operations().len();
    assert!(matches!(
        engine.operations().last().unwrap(),
        SimOp::SetState {
            state: PipelineState::Null
        }
    ));
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(engine.operations().len(), ops_after_shutdown);
}

#[tokio::test]
async fn shutdown_twice_is_a_no_op() {
    let engine = Arc::new(SimEngine::new());
    let (handle, stop) = spawn_run(engine.clone()).await;

    stop.cancel();
    let (result, mut controller) = handle.await.unwrap();
    result.unwrap();

    let ops_after_first = engine.operations();
    controller.shutdown().await;
    assert_eq!(engine.operations(), ops_after_first);
    assert!(!engine.pipeline_alive());
}

#[tokio::test]
async fn engine_error_message_stops_the_run() {
    let engine = Arc::new(SimEngine::new());
    let (handle, _stop) = spawn_run(engine.clone()).await;

    engine.emit(Message::Error {
        source: MessageSource {
            id: ObjectId(99),
            name: "rtmp-sink".to_string(),
        },
        message: "could not connect".to_string(),
        detail: Some("connection refused".to_string()),
    });

    // A runtime error is fatal but still takes the clean shutdown path.
    let (result, _controller) = handle.await.unwrap();
    result.unwrap();
    assert!(!engine.pipeline_alive());
    assert!(matches!(
        engine.operations().last().unwrap(),
        SimOp::SetState {
            state: PipelineState::Null
        }
    ));
}

#[tokio::test]
async fn eos_stops_the_run() {
    let engine = Arc::new(SimEngine::new());
    let (handle, _stop) = spawn_run(engine.clone()).await;

    engine.emit(Message::Eos);
    let (result, _controller) = handle.await.unwrap();
    result.unwrap();
    assert!(!engine.pipeline_alive());
}

#[tokio::test]
async fn foreign_state_changes_and_warnings_do_not_stop_the_run() {
    let engine = Arc::new(SimEngine::new());
    let (handle, stop) = spawn_run(engine.clone()).await;

    engine.emit(Message::StateChanged {
        source: MessageSource {
            id: ObjectId(12345),
            name: "camera-streamer-pipeline".to_string(),
        },
        old: PipelineState::Ready,
        new: PipelineState::Paused,
    });
    engine.emit(Message::StateChanged {
        source: MessageSource {
            id: engine.pipeline_id().unwrap(),
            name: "camera-streamer-pipeline".to_string(),
        },
        old: PipelineState::Paused,
        new: PipelineState::Playing,
    });
    engine.emit(Message::Warning {
        source: MessageSource {
            id: ObjectId(7),
            name: "video-source".to_string(),
        },
        message: "frames are late".to_string(),
    });
    engine.emit(Message::StreamStatus {
        kind: "Enter".to_string(),
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stop.is_cancelled());
    assert!(engine.pipeline_alive());

    stop.cancel();
    let (result, _controller) = handle.await.unwrap();
    result.unwrap();
}

#[tokio::test]
async fn build_registers_the_full_declared_stage_set() {
    let engine = Arc::new(SimEngine::new());
    let (handle, stop) = spawn_run(engine.clone()).await;
    stop.cancel();
    let (result, _controller) = handle.await.unwrap();
    result.unwrap();

    let registered: Vec<Vec<String>> = engine
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            SimOp::AddStages { names } => Some(names),
            _ => None,
        })
        .collect();
    assert_eq!(registered.len(), 1, "registration must be one atomic step");
    let expected: Vec<String> = DECLARED_STAGES
        .iter()
        .map(|(_, name)| name.to_string())
        .collect();
    assert_eq!(registered[0], expected);
}

#[tokio::test]
async fn refused_playing_fails_fast_without_blocking() {
    let engine = Arc::new(SimEngine::new());
    engine.refuse_playing();
    let mut controller = LifecycleController::new(engine.clone(), settings());

    let result = tokio::time::timeout(Duration::from_secs(2), controller.run()).await;
    let err = result.expect("run must not block on a failed transition");
    assert!(matches!(
        err.unwrap_err(),
        PushError::StateChange {
            target: PipelineState::Playing,
            ..
        }
    ));
    assert!(!engine.pipeline_alive());
}

#[tokio::test]
async fn build_failure_surfaces_before_any_registration() {
    let engine = Arc::new(SimEngine::new());
    engine.fail_stage_kind("flvmux");
    let mut controller = LifecycleController::new(engine.clone(), settings());

    let err = controller.run().await.unwrap_err();
    assert!(matches!(err, PushError::Build(_)));
    assert!(!engine
        .operations()
        .iter()
        .any(|op| matches!(op, SimOp::AddStages { .. })));
}
