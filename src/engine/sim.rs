// Simulated media engine
//
// Deterministic in-process implementation of the engine seam. Every call is
// recorded in an operation log that tests assert against, failures can be
// scripted per stage kind, link, or request pad, and bus messages are
// injected by hand. The binary also falls back to this backend when built
// without `gst-engine`, which makes a dry run possible on machines without
// the real engine installed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use super::{
    EngineError, EngineResult, MediaEngine, Message, ObjectId, PadHandle, PadKind, Pipeline,
    PipelineRef, PipelineState, PropertyValue, Stage, StageRef, StateTransition,
};

/// One recorded engine operation
#[derive(Debug, Clone, PartialEq)]
pub enum SimOp {
    CreatePipeline { name: String },
    CreateStage { kind: String, name: String },
    AddStages { names: Vec<String> },
    Link { upstream: String, downstream: String },
    LinkPads { src: String, sink: String },
    RequestPad { stage: String, pad: String },
    ReleasePad { stage: String, pad: String },
    SetProperty { stage: String, key: String, value: String },
    SetState { state: PipelineState },
}

#[derive(Default)]
struct Script {
    fail_kinds: HashSet<String>,
    fail_links: HashSet<(String, String)>,
    fail_request_pads: HashSet<(String, String)>,
    refuse_playing: bool,
}

struct Shared {
    next_id: AtomicU64,
    ops: Mutex<Vec<SimOp>>,
    script: Mutex<Script>,
    outstanding_pads: Mutex<HashSet<(String, String)>>,
    bus: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pipeline: Mutex<Weak<SimPipeline>>,
}

impl Shared {
    fn record(&self, op: SimOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn fresh_id(&self) -> ObjectId {
        ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Scriptable engine simulation with an inspectable operation log
pub struct SimEngine {
    shared: Arc<Shared>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                next_id: AtomicU64::new(1),
                ops: Mutex::new(Vec::new()),
                script: Mutex::new(Script::default()),
                outstanding_pads: Mutex::new(HashSet::new()),
                bus: Mutex::new(None),
                pipeline: Mutex::new(Weak::new()),
            }),
        }
    }

    /// Make every factory call for the given stage kind fail
    pub fn fail_stage_kind(&self, kind: impl Into<String>) {
        self.shared.script.lock().unwrap().fail_kinds.insert(kind.into());
    }

    /// Refuse the link between the two named stages (stage or pad level)
    pub fn fail_link(&self, upstream: impl Into<String>, downstream: impl Into<String>) {
        self.shared
            .script
            .lock()
            .unwrap()
            .fail_links
            .insert((upstream.into(), downstream.into()));
    }

    /// Refuse a request pad on the named stage
    pub fn fail_request_pad(&self, stage: impl Into<String>, template: impl Into<String>) {
        self.shared
            .script
            .lock()
            .unwrap()
            .fail_request_pads
            .insert((stage.into(), template.into()));
    }

    /// Refuse the transition to PLAYING
    pub fn refuse_playing(&self) {
        self.shared.script.lock().unwrap().refuse_playing = true;
    }

    /// Snapshot of every operation performed so far
    pub fn operations(&self) -> Vec<SimOp> {
        self.shared.ops.lock().unwrap().clone()
    }

    /// Request pads acquired but not yet released, as (stage, pad) pairs
    pub fn outstanding_request_pads(&self) -> Vec<(String, String)> {
        let mut pads: Vec<_> = self
            .shared
            .outstanding_pads
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect();
        pads.sort();
        pads
    }

    /// Whether the pipeline created through this engine is still referenced
    pub fn pipeline_alive(&self) -> bool {
        self.shared.pipeline.lock().unwrap().strong_count() > 0
    }

    /// Identity of the pipeline created through this engine, if any
    pub fn pipeline_id(&self) -> Option<ObjectId> {
        self.shared
            .pipeline
            .lock()
            .unwrap()
            .upgrade()
            .map(|p| p.id)
    }

    /// Whether a bus subscription is currently attached and being consumed
    pub fn bus_attached(&self) -> bool {
        self.shared
            .bus
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Inject a message onto the bus, as the engine's delivery thread would
    pub fn emit(&self, message: Message) {
        if let Some(tx) = self.shared.bus.lock().unwrap().as_ref() {
            let _ = tx.send(message);
        }
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for SimEngine {
    fn create_pipeline(&self, name: &str) -> EngineResult<PipelineRef> {
        let pipeline = Arc::new(SimPipeline {
            id: self.shared.fresh_id(),
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
            stages: Mutex::new(Vec::new()),
            state: Mutex::new(PipelineState::Null),
        });
        self.shared.record(SimOp::CreatePipeline { name: name.to_string() });
        *self.shared.pipeline.lock().unwrap() = Arc::downgrade(&pipeline);
        Ok(pipeline)
    }

    fn create_stage(&self, kind: &str, name: &str) -> EngineResult<StageRef> {
        if self.shared.script.lock().unwrap().fail_kinds.contains(kind) {
            return Err(EngineError::UnknownStageKind(kind.to_string()));
        }
        self.shared.record(SimOp::CreateStage {
            kind: kind.to_string(),
            name: name.to_string(),
        });
        Ok(Arc::new(SimStage {
            id: self.shared.fresh_id(),
            name: name.to_string(),
            kind: kind.to_string(),
            shared: Arc::clone(&self.shared),
            properties: Mutex::new(HashMap::new()),
        }))
    }
}

struct SimStage {
    id: ObjectId,
    name: String,
    kind: String,
    shared: Arc<Shared>,
    properties: Mutex<HashMap<String, PropertyValue>>,
}

impl Stage for SimStage {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn set_property(&self, key: &str, value: PropertyValue) -> EngineResult<()> {
        self.shared.record(SimOp::SetProperty {
            stage: self.name.clone(),
            key: key.to_string(),
            value: value.to_string(),
        });
        self.properties.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn property(&self, key: &str) -> EngineResult<PropertyValue> {
        self.properties
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProperty {
                stage: self.name.clone(),
                key: key.to_string(),
            })
    }

    fn static_pad(&self, name: &str) -> EngineResult<PadHandle> {
        Ok(PadHandle {
            stage: self.id,
            stage_name: self.name.clone(),
            name: name.to_string(),
            kind: PadKind::Static,
        })
    }

    fn request_pad(&self, template: &str) -> EngineResult<PadHandle> {
        let key = (self.name.clone(), template.to_string());
        if self
            .shared
            .script
            .lock()
            .unwrap()
            .fail_request_pads
            .contains(&key)
        {
            return Err(EngineError::PadUnavailable {
                stage: self.name.clone(),
                pad: template.to_string(),
            });
        }
        self.shared.record(SimOp::RequestPad {
            stage: self.name.clone(),
            pad: template.to_string(),
        });
        self.shared.outstanding_pads.lock().unwrap().insert(key);
        Ok(PadHandle {
            stage: self.id,
            stage_name: self.name.clone(),
            name: template.to_string(),
            kind: PadKind::Request,
        })
    }

    fn release_request_pad(&self, pad: &PadHandle) -> EngineResult<()> {
        self.shared.record(SimOp::ReleasePad {
            stage: self.name.clone(),
            pad: pad.name.clone(),
        });
        self.shared
            .outstanding_pads
            .lock()
            .unwrap()
            .remove(&(self.name.clone(), pad.name.clone()));
        Ok(())
    }
}

struct SimPipeline {
    id: ObjectId,
    name: String,
    shared: Arc<Shared>,
    stages: Mutex<Vec<StageRef>>,
    state: Mutex<PipelineState>,
}

impl Pipeline for SimPipeline {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn add_all(&self, stages: &[StageRef]) -> EngineResult<()> {
        let names: Vec<String> = stages.iter().map(|s| s.name().to_string()).collect();
        self.shared.record(SimOp::AddStages { names });
        self.stages.lock().unwrap().extend(stages.iter().cloned());
        Ok(())
    }

    fn link(&self, upstream: &dyn Stage, downstream: &dyn Stage) -> EngineResult<()> {
        let pair = (upstream.name().to_string(), downstream.name().to_string());
        if self.shared.script.lock().unwrap().fail_links.contains(&pair) {
            return Err(EngineError::LinkRefused(format!(
                "{} -> {}",
                pair.0, pair.1
            )));
        }
        self.shared.record(SimOp::Link {
            upstream: pair.0,
            downstream: pair.1,
        });
        Ok(())
    }

    fn link_pads(&self, src: &PadHandle, sink: &PadHandle) -> EngineResult<()> {
        let pair = (src.stage_name.clone(), sink.stage_name.clone());
        if self.shared.script.lock().unwrap().fail_links.contains(&pair) {
            return Err(EngineError::LinkRefused(format!("{} -> {}", src, sink)));
        }
        self.shared.record(SimOp::LinkPads {
            src: src.to_string(),
            sink: sink.to_string(),
        });
        Ok(())
    }

    fn set_state(&self, target: PipelineState) -> EngineResult<StateTransition> {
        if target == PipelineState::Playing && self.shared.script.lock().unwrap().refuse_playing {
            return Err(EngineError::StateChange(
                "simulated PLAYING refusal".to_string(),
            ));
        }
        self.shared.record(SimOp::SetState { state: target });
        *self.state.lock().unwrap() = target;
        Ok(StateTransition::Complete)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.bus.lock().unwrap() = Some(tx);
        rx
    }
}
