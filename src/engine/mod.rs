// Media engine seam
//
// The actual media processing (capture, codecs, muxing, RTMP transport) is
// delegated to an external engine. This module is the full contact surface
// with that engine: stage factories by type identifier, property access by
// key, container add/link operations, request pad acquisition, bus message
// delivery, and state transition requests.
//
// Two backends implement the seam: `sim` (deterministic in-process
// simulation, used by the test suite and dry runs) and `gst` (GStreamer,
// behind the `gst-engine` feature).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(feature = "gst-engine")]
pub mod gst;
pub mod sim;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures reported by the engine backend
#[derive(Debug, Error)]
pub enum EngineError {
    /// No factory registered for the requested stage kind
    #[error("unknown stage kind: {0}")]
    UnknownStageKind(String),

    /// The stage does not expose the requested property
    #[error("stage {stage} has no property {key}")]
    UnknownProperty { stage: String, key: String },

    /// The requested pad does not exist or cannot be acquired
    #[error("pad {pad} unavailable on stage {stage}")]
    PadUnavailable { stage: String, pad: String },

    /// Caps negotiation between two stages or pads failed
    #[error("link refused: {0}")]
    LinkRefused(String),

    /// The engine refused a state transition
    #[error("state change refused: {0}")]
    StateChange(String),

    /// Any other backend failure
    #[error("{0}")]
    Backend(String),
}

/// Opaque identity of an engine object
///
/// Used to compare message sources against the top-level pipeline. Identity
/// comparison tolerates duplicate display names, which the engine allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

/// Pipeline state as reported and requested through the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Null => "NULL",
            PipelineState::Ready => "READY",
            PipelineState::Paused => "PAUSED",
            PipelineState::Playing => "PLAYING",
        };
        write!(f, "{}", name)
    }
}

/// Completion report for a state transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// The transition completed synchronously
    Complete,
    /// The transition will complete asynchronously; progress arrives on the bus
    Async,
}

/// Pad classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadKind {
    /// Always present on the stage
    Static,
    /// Acquired per build and released on failure
    Request,
}

/// Handle to a typed port on a stage
///
/// Handles are plain values; the backend resolves them to its own pad objects
/// when linking or releasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadHandle {
    pub stage: ObjectId,
    pub stage_name: String,
    pub name: String,
    pub kind: PadKind,
}

impl fmt::Display for PadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stage_name, self.name)
    }
}

/// Pixel format of raw video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    I420,
    Nv12,
    Rgb,
}

impl PixelFormat {
    /// Engine name for this format
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::I420 => "I420",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Rgb => "RGB",
        }
    }
}

/// Media format descriptor used to restrict negotiation
///
/// Rendered to the engine's caps string form when applied to a caps filter;
/// never stored independently of the stage that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCaps {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub format: PixelFormat,
}

impl MediaCaps {
    /// Render the caps in the engine's string syntax
    pub fn to_caps_string(&self) -> String {
        format!(
            "video/x-raw,width={},height={},framerate={}/1,format={}",
            self.width,
            self.height,
            self.framerate,
            self.format.as_str()
        )
    }
}

/// Typed property value accepted by stages
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    Int(i32),
    UInt(u32),
    Int64(i64),
    /// Named value of an engine-side enumeration, e.g. an encoder preset
    EnumName(String),
    Caps(MediaCaps),
}

impl PropertyValue {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn enum_name(value: impl Into<String>) -> Self {
        Self::EnumName(value.into())
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Str(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::UInt(v) => write!(f, "{}", v),
            PropertyValue::Int64(v) => write!(f, "{}", v),
            PropertyValue::EnumName(v) => write!(f, "{}", v),
            PropertyValue::Caps(v) => write!(f, "{}", v.to_caps_string()),
        }
    }
}

/// Identity and display name of the object a message originated from
#[derive(Debug, Clone)]
pub struct MessageSource {
    pub id: ObjectId,
    pub name: String,
}

/// Notification delivered on the engine bus
///
/// Delivery is serialized by the engine; consumers never see two messages
/// concurrently.
#[derive(Debug, Clone)]
pub enum Message {
    /// End of stream reached
    Eos,
    /// Fatal engine-reported failure
    Error {
        source: MessageSource,
        message: String,
        detail: Option<String>,
    },
    /// Non-fatal condition
    Warning {
        source: MessageSource,
        message: String,
    },
    /// A state transition completed somewhere in the graph
    StateChanged {
        source: MessageSource,
        old: PipelineState,
        new: PipelineState,
    },
    /// Streaming thread status marker
    StreamStatus { kind: String },
    /// Anything the orchestration does not care about
    Other,
}

/// One named processing unit in the media graph
///
/// Property access is declared thread-safe by the engine; no external
/// synchronization is required around these calls.
pub trait Stage: Send + Sync {
    /// Engine identity of this stage
    fn id(&self) -> ObjectId;

    /// Display name given at creation
    fn name(&self) -> &str;

    /// Engine type identifier this stage was created from
    fn kind(&self) -> &str;

    /// Set a property by key
    fn set_property(&self, key: &str, value: PropertyValue) -> EngineResult<()>;

    /// Read a property back
    fn property(&self, key: &str) -> EngineResult<PropertyValue>;

    /// Look up an always-present pad
    fn static_pad(&self, name: &str) -> EngineResult<PadHandle>;

    /// Acquire a request pad from the given template
    fn request_pad(&self, template: &str) -> EngineResult<PadHandle>;

    /// Return a previously acquired request pad to the stage
    fn release_request_pad(&self, pad: &PadHandle) -> EngineResult<()>;
}

/// Shared stage handle
pub type StageRef = Arc<dyn Stage>;

/// Top-level container owning all stages
pub trait Pipeline: Send + Sync {
    /// Engine identity of the container itself
    fn id(&self) -> ObjectId;

    /// Display name given at creation
    fn name(&self) -> &str;

    /// Register the complete stage set in one step
    ///
    /// Ownership of every stage transfers to the container; stages are never
    /// independently destroyed afterwards.
    fn add_all(&self, stages: &[StageRef]) -> EngineResult<()>;

    /// Negotiate a static link between two registered stages
    fn link(&self, upstream: &dyn Stage, downstream: &dyn Stage) -> EngineResult<()>;

    /// Negotiate a link between two explicit pads
    fn link_pads(&self, src: &PadHandle, sink: &PadHandle) -> EngineResult<()>;

    /// Request a state transition
    fn set_state(&self, target: PipelineState) -> EngineResult<StateTransition>;

    /// Subscribe to the bus message stream
    ///
    /// The engine serializes delivery onto the returned channel. Only one
    /// subscription is live at a time; a later call replaces the earlier one.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Message>;
}

/// Shared pipeline handle
pub type PipelineRef = Arc<dyn Pipeline>;

/// Factory surface of the engine backend
pub trait MediaEngine: Send + Sync {
    /// Create the top-level pipeline container
    fn create_pipeline(&self, name: &str) -> EngineResult<PipelineRef>;

    /// Create a stage from an engine type identifier
    fn create_stage(&self, kind: &str, name: &str) -> EngineResult<StageRef>;
}

/// Shared engine handle
pub type EngineRef = Arc<dyn MediaEngine>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_string_matches_engine_syntax() {
        let caps = MediaCaps {
            width: 640,
            height: 480,
            framerate: 30,
            format: PixelFormat::I420,
        };
        assert_eq!(
            caps.to_caps_string(),
            "video/x-raw,width=640,height=480,framerate=30/1,format=I420"
        );
    }

    #[test]
    fn pad_handle_displays_stage_and_pad() {
        let pad = PadHandle {
            stage: ObjectId(7),
            stage_name: "flv-mux".into(),
            name: "video".into(),
            kind: PadKind::Request,
        };
        assert_eq!(pad.to_string(), "flv-mux:video");
    }
}
