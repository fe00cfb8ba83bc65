// Lifecycle orchestration
//
// Owns the whole run: build the graph, start the overlay refresh and the bus
// dispatcher, request PLAYING, block until something asks for a stop, then
// tear everything down in a fixed order. Every shared handle (pipeline,
// overlay slot, stop token) is a field of this one controller instance,
// passed explicitly to the collaborator that needs it.

use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StreamSettings;
use crate::dispatch::MessageDispatcher;
use crate::engine::{EngineRef, PipelineRef, PipelineState};
use crate::error::{PushError, PushResult};
use crate::overlay::{OverlaySlot, OverlayUpdater};
use crate::pipeline::PipelineBuilder;

/// Top-level orchestrator for one push run
///
/// One instance per process; a second run needs a new controller.
pub struct LifecycleController {
    engine: EngineRef,
    settings: StreamSettings,
    pipeline: Option<PipelineRef>,
    overlay_slot: OverlaySlot,
    overlay_cancel: CancellationToken,
    overlay_task: Option<JoinHandle<()>>,
    dispatcher_task: Option<JoinHandle<()>>,
    stop: CancellationToken,
    shutdown_complete: bool,
}

impl LifecycleController {
    pub fn new(engine: EngineRef, settings: StreamSettings) -> Self {
        Self {
            engine,
            settings,
            pipeline: None,
            overlay_slot: OverlaySlot::new(),
            overlay_cancel: CancellationToken::new(),
            overlay_task: None,
            dispatcher_task: None,
            stop: CancellationToken::new(),
            shutdown_complete: false,
        }
    }

    /// Token that requests a stop when cancelled
    ///
    /// The dispatcher holds a clone; tests and embedders can hold one too.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Build, play, block until stop, tear down
    ///
    /// Returns only after teardown completed (or after a failed startup was
    /// rolled back). The caller maps the error to an exit code.
    pub async fn run(&mut self) -> PushResult<()> {
        self.settings.validate()?;

        if let Err(e) = self.start() {
            // Never enter the run phase half-started.
            self.shutdown().await;
            return Err(e);
        }

        self.wait_for_stop().await;
        self.shutdown().await;
        Ok(())
    }

    /// Assemble the graph, attach collaborators, request PLAYING
    fn start(&mut self) -> PushResult<()> {
        let built = PipelineBuilder::new(self.engine.as_ref(), &self.settings).build()?;
        info!(
            "pipeline built: {}x{}@{} -> {}",
            self.settings.width, self.settings.height, self.settings.framerate, self.settings.url
        );

        self.overlay_slot.set(built.overlay);
        self.overlay_task = Some(
            OverlayUpdater::new(self.overlay_slot.clone()).spawn(self.overlay_cancel.clone()),
        );

        let bus = built.pipeline.subscribe();
        let dispatcher = MessageDispatcher::new(built.pipeline.id(), self.stop.clone());
        self.dispatcher_task = Some(tokio::spawn(dispatcher.run(bus)));

        // Ownership of the pipeline lands here either way so a failed
        // transition still gets the full teardown path.
        let transition = built.pipeline.set_state(PipelineState::Playing);
        self.pipeline = Some(built.pipeline);
        match transition {
            Ok(_) => {
                info!("PLAYING requested, push is live");
                Ok(())
            }
            Err(e) => Err(PushError::state_change(PipelineState::Playing, e.to_string())),
        }
    }

    /// Block until an OS interrupt or a dispatcher stop request
    async fn wait_for_stop(&self) {
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = interrupt() => {
                info!("interrupt received, stopping");
                // The handler's only effect: request termination. Pipeline
                // state is touched exclusively by the shutdown sequence.
                self.stop.cancel();
            }
        }
    }

    /// Ordered, idempotent teardown
    ///
    /// Order is load-bearing: the overlay timer goes first, then the
    /// pipeline leaves PLAYING so the sink can flush and close before any
    /// other handle is released, then the last pipeline reference drops,
    /// then the bus watch detaches. A second invocation is a no-op.
    pub async fn shutdown(&mut self) {
        if self.shutdown_complete {
            return;
        }
        self.shutdown_complete = true;

        self.overlay_cancel.cancel();
        if let Some(task) = self.overlay_task.take() {
            let _ = task.await;
        }
        self.overlay_slot.clear();

        if let Some(pipeline) = &self.pipeline {
            if let Err(e) = pipeline.set_state(PipelineState::Null) {
                warn!("NULL transition failed during shutdown: {e}");
            }
        }
        self.pipeline = None;

        self.stop.cancel();
        if let Some(task) = self.dispatcher_task.take() {
            task.abort();
            let _ = task.await;
        }

        info!("push stopped");
    }
}

/// Resolve when the process receives an interrupt request
async fn interrupt() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::{SimEngine, SimOp};
    use std::sync::Arc;

    #[tokio::test]
    async fn rejects_invalid_settings_before_building() {
        let engine = Arc::new(SimEngine::new());
        let settings = StreamSettings {
            width: 0,
            ..Default::default()
        };
        let mut controller = LifecycleController::new(engine.clone(), settings);

        let err = controller.run().await.unwrap_err();
        assert!(matches!(err, PushError::Configuration(_)));
        assert!(engine.operations().is_empty());
    }

    #[tokio::test]
    async fn failed_playing_transition_releases_the_pipeline() {
        let engine = Arc::new(SimEngine::new());
        engine.refuse_playing();
        let mut controller =
            LifecycleController::new(engine.clone(), StreamSettings::default());

        let err = controller.run().await.unwrap_err();
        assert!(matches!(
            err,
            PushError::StateChange {
                target: PipelineState::Playing,
                ..
            }
        ));
        assert!(!engine.pipeline_alive());
        // Teardown still drove the pipeline to NULL before the release.
        assert!(engine.operations().iter().any(|op| matches!(
            op,
            SimOp::SetState {
                state: PipelineState::Null
            }
        )));
    }

    #[tokio::test]
    async fn stop_token_ends_the_run_cleanly() {
        let engine = Arc::new(SimEngine::new());
        let mut controller =
            LifecycleController::new(engine.clone(), StreamSettings::default());
        let stop = controller.stop_token();

        let run = async { controller.run().await };
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("run ended before stop was requested"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
        }
        stop.cancel();
        run.await.unwrap();
        assert!(!engine.pipeline_alive());
    }
}
