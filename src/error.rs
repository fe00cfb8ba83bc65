// Error types and result aliases

use thiserror::Error;

use crate::engine::{EngineError, PipelineState};

/// Result type for the top-level push workflow
pub type PushResult<T> = Result<T, PushError>;

/// Result type for pipeline construction
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors raised while assembling the media graph
///
/// Every variant names the stage or link that failed so a build failure can
/// be diagnosed from the log line alone. Build errors are fatal and surface
/// before any data flows.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The pipeline container itself could not be created
    #[error("failed to create pipeline container: {0}")]
    Pipeline(String),

    /// One or more stage factories failed; lists every missing stage
    #[error("failed to create stage(s): {}", missing.join(", "))]
    StageCreation { missing: Vec<String> },

    /// A stage refused a property from the validated configuration
    #[error("failed to configure stage {stage}: {reason}")]
    Configuration { stage: String, reason: String },

    /// Registering the stage set with the container failed
    #[error("failed to register stages with the pipeline: {0}")]
    Registration(String),

    /// A static link between two stages could not be negotiated
    #[error("failed to link {upstream} -> {downstream}")]
    Link { upstream: String, downstream: String },

    /// A request pad could not be acquired from a stage
    #[error("failed to acquire request pad {pad} on {stage}")]
    PadRequest { stage: String, pad: String },

    /// Two pads refused to link
    #[error("failed to link pad {src} -> {sink}")]
    PadLink { src: String, sink: String },
}

impl BuildError {
    /// Create a link error naming the failing pair
    pub fn link(upstream: impl Into<String>, downstream: impl Into<String>) -> Self {
        Self::Link {
            upstream: upstream.into(),
            downstream: downstream.into(),
        }
    }

    /// Create a pad request error
    pub fn pad_request(stage: impl Into<String>, pad: impl Into<String>) -> Self {
        Self::PadRequest {
            stage: stage.into(),
            pad: pad.into(),
        }
    }

    /// Create a pad link error
    pub fn pad_link(src: impl Into<String>, sink: impl Into<String>) -> Self {
        Self::PadLink {
            src: src.into(),
            sink: sink.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the lifecycle controller
#[derive(Debug, Error)]
pub enum PushError {
    /// The media graph could not be assembled
    #[error("pipeline build failed: {0}")]
    Build(#[from] BuildError),

    /// Invalid stream settings were rejected before the build
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The engine refused a pipeline state transition
    #[error("state change to {target} failed: {reason}")]
    StateChange {
        target: PipelineState,
        reason: String,
    },

    /// Any other engine-reported failure
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl PushError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a state change error
    pub fn state_change(target: PipelineState, reason: impl Into<String>) -> Self {
        Self::StateChange {
            target,
            reason: reason.into(),
        }
    }
}
