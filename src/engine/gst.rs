// GStreamer engine backend
//
// Real implementation of the engine seam on top of the gstreamer crate.
// Stages wrap elements, pad handles resolve through registries shared between
// the engine and the pipeline, and a pump thread forwards bus messages into
// the tokio channel the dispatcher consumes. Only built with the
// `gst-engine` feature; requires the system GStreamer libraries.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use log::debug;
use tokio::sync::mpsc;

use super::{
    EngineError, EngineResult, MediaEngine, Message, MessageSource, ObjectId, PadHandle, PadKind,
    Pipeline, PipelineRef, PipelineState, PropertyValue, Stage, StageRef, StateTransition,
};

type ElementRegistry = Arc<Mutex<HashMap<u64, gst::Element>>>;
type PadRegistry = Arc<Mutex<HashMap<(u64, String), gst::Pad>>>;

fn object_id<T: glib::prelude::ObjectType>(object: &T) -> ObjectId {
    ObjectId(object.as_ptr() as usize as u64)
}

/// GStreamer-backed media engine
pub struct GstEngine {
    elements: ElementRegistry,
    request_pads: PadRegistry,
}

impl GstEngine {
    /// Initialize GStreamer and create the engine
    pub fn new() -> EngineResult<Self> {
        gst::init().map_err(|e| EngineError::Backend(e.to_string()))?;
        debug!("{}", gst::version_string());
        Ok(Self {
            elements: Arc::new(Mutex::new(HashMap::new())),
            request_pads: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl MediaEngine for GstEngine {
    fn create_pipeline(&self, name: &str) -> EngineResult<PipelineRef> {
        let pipeline = gst::Pipeline::builder().name(name).build();
        Ok(Arc::new(GstPipeline {
            pipeline,
            elements: Arc::clone(&self.elements),
            request_pads: Arc::clone(&self.request_pads),
        }))
    }

    fn create_stage(&self, kind: &str, name: &str) -> EngineResult<StageRef> {
        let element = gst::ElementFactory::make(kind)
            .name(name)
            .build()
            .map_err(|_| EngineError::UnknownStageKind(kind.to_string()))?;
        self.elements
            .lock()
            .unwrap()
            .insert(object_id(&element).0, element.clone());
        Ok(Arc::new(GstStage {
            element,
            kind: kind.to_string(),
            name: name.to_string(),
            request_pads: Arc::clone(&self.request_pads),
        }))
    }
}

struct GstStage {
    element: gst::Element,
    kind: String,
    name: String,
    request_pads: PadRegistry,
}

impl Stage for GstStage {
    fn id(&self) -> ObjectId {
        object_id(&self.element)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn set_property(&self, key: &str, value: PropertyValue) -> EngineResult<()> {
        // Existence is checked up front so an engine-version mismatch surfaces
        // as a clean error instead of a glib abort.
        if !self.element.has_property(key, None) {
            return Err(EngineError::UnknownProperty {
                stage: self.name.clone(),
                key: key.to_string(),
            });
        }
        match value {
            PropertyValue::Str(v) => self.element.set_property(key, v),
            PropertyValue::Bool(v) => self.element.set_property(key, v),
            PropertyValue::Int(v) => self.element.set_property(key, v),
            PropertyValue::UInt(v) => self.element.set_property(key, v),
            PropertyValue::Int64(v) => self.element.set_property(key, v),
            PropertyValue::EnumName(v) => self.element.set_property_from_str(key, &v),
            PropertyValue::Caps(v) => {
                let caps = gst::Caps::from_str(&v.to_caps_string())
                    .map_err(|e| EngineError::Backend(e.to_string()))?;
                self.element.set_property(key, caps);
            }
        }
        Ok(())
    }

    fn property(&self, key: &str) -> EngineResult<PropertyValue> {
        if !self.element.has_property(key, None) {
            return Err(EngineError::UnknownProperty {
                stage: self.name.clone(),
                key: key.to_string(),
            });
        }
        let value = self.element.property_value(key);
        let converted = if let Ok(v) = value.get::<bool>() {
            PropertyValue::Bool(v)
        } else if let Ok(v) = value.get::<i32>() {
            PropertyValue::Int(v)
        } else if let Ok(v) = value.get::<u32>() {
            PropertyValue::UInt(v)
        } else if let Ok(v) = value.get::<i64>() {
            PropertyValue::Int64(v)
        } else if let Ok(v) = value.get::<String>() {
            PropertyValue::Str(v)
        } else {
            return Err(EngineError::Backend(format!(
                "property {key} on {} has an unmapped type",
                self.name
            )));
        };
        Ok(converted)
    }

    fn static_pad(&self, name: &str) -> EngineResult<PadHandle> {
        let pad = self
            .element
            .static_pad(name)
            .ok_or_else(|| EngineError::PadUnavailable {
                stage: self.name.clone(),
                pad: name.to_string(),
            })?;
        Ok(PadHandle {
            stage: self.id(),
            stage_name: self.name.clone(),
            name: pad.name().to_string(),
            kind: PadKind::Static,
        })
    }

    fn request_pad(&self, template: &str) -> EngineResult<PadHandle> {
        let pad = self
            .element
            .request_pad_simple(template)
            .ok_or_else(|| EngineError::PadUnavailable {
                stage: self.name.clone(),
                pad: template.to_string(),
            })?;
        let name = pad.name().to_string();
        self.request_pads
            .lock()
            .unwrap()
            .insert((self.id().0, name.clone()), pad);
        Ok(PadHandle {
            stage: self.id(),
            stage_name: self.name.clone(),
            name,
            kind: PadKind::Request,
        })
    }

    fn release_request_pad(&self, pad: &PadHandle) -> EngineResult<()> {
        let removed = self
            .request_pads
            .lock()
            .unwrap()
            .remove(&(pad.stage.0, pad.name.clone()));
        match removed {
            Some(gst_pad) => {
                self.element.release_request_pad(&gst_pad);
                Ok(())
            }
            None => Err(EngineError::PadUnavailable {
                stage: self.name.clone(),
                pad: pad.name.clone(),
            }),
        }
    }
}

struct GstPipeline {
    pipeline: gst::Pipeline,
    elements: ElementRegistry,
    request_pads: PadRegistry,
}

impl GstPipeline {
    fn element(&self, id: ObjectId, name: &str) -> EngineResult<gst::Element> {
        self.elements
            .lock()
            .unwrap()
            .get(&id.0)
            .cloned()
            .ok_or_else(|| EngineError::Backend(format!("stage {name} is not registered")))
    }

    fn resolve_pad(&self, handle: &PadHandle) -> EngineResult<gst::Pad> {
        if handle.kind == PadKind::Request {
            if let Some(pad) = self
                .request_pads
                .lock()
                .unwrap()
                .get(&(handle.stage.0, handle.name.clone()))
            {
                return Ok(pad.clone());
            }
        }
        let element = self.element(handle.stage, &handle.stage_name)?;
        element
            .static_pad(&handle.name)
            .ok_or_else(|| EngineError::PadUnavailable {
                stage: handle.stage_name.clone(),
                pad: handle.name.clone(),
            })
    }
}

impl Pipeline for GstPipeline {
    fn id(&self) -> ObjectId {
        object_id(&self.pipeline)
    }

    fn name(&self) -> &str {
        "pipeline"
    }

    fn add_all(&self, stages: &[StageRef]) -> EngineResult<()> {
        let registry = self.elements.lock().unwrap();
        let mut elements = Vec::with_capacity(stages.len());
        for stage in stages {
            let element = registry
                .get(&stage.id().0)
                .ok_or_else(|| EngineError::Backend(format!("stage {} is not registered", stage.name())))?;
            elements.push(element.clone());
        }
        drop(registry);
        self.pipeline
            .add_many(elements.iter())
            .map_err(|e| EngineError::Backend(e.to_string()))
    }

    fn link(&self, upstream: &dyn Stage, downstream: &dyn Stage) -> EngineResult<()> {
        let up = self.element(upstream.id(), upstream.name())?;
        let down = self.element(downstream.id(), downstream.name())?;
        up.link(&down).map_err(|_| {
            EngineError::LinkRefused(format!("{} -> {}", upstream.name(), downstream.name()))
        })
    }

    fn link_pads(&self, src: &PadHandle, sink: &PadHandle) -> EngineResult<()> {
        let src_pad = self.resolve_pad(src)?;
        let sink_pad = self.resolve_pad(sink)?;
        src_pad
            .link(&sink_pad)
            .map(|_| ())
            .map_err(|e| EngineError::LinkRefused(format!("{} -> {}: {:?}", src, sink, e)))
    }

    fn set_state(&self, target: PipelineState) -> EngineResult<StateTransition> {
        let state = match target {
            PipelineState::Null => gst::State::Null,
            PipelineState::Ready => gst::State::Ready,
            PipelineState::Paused => gst::State::Paused,
            PipelineState::Playing => gst::State::Playing,
        };
        match self.pipeline.set_state(state) {
            Ok(gst::StateChangeSuccess::Async) => Ok(StateTransition::Async),
            Ok(_) => Ok(StateTransition::Complete),
            Err(e) => Err(EngineError::StateChange(e.to_string())),
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(bus) = self.pipeline.bus() else {
            return rx;
        };
        std::thread::spawn(move || {
            while !tx.is_closed() {
                let Some(message) = bus.timed_pop(gst::ClockTime::from_mseconds(500)) else {
                    continue;
                };
                if tx.send(translate(&message)).is_err() {
                    break;
                }
            }
        });
        rx
    }
}

fn message_source(message: &gst::Message) -> MessageSource {
    match message.src() {
        Some(src) => MessageSource {
            id: object_id(src),
            name: src.name().to_string(),
        },
        None => MessageSource {
            id: ObjectId(0),
            name: "<unknown>".to_string(),
        },
    }
}

fn map_state(state: gst::State) -> Option<PipelineState> {
    match state {
        gst::State::Null => Some(PipelineState::Null),
        gst::State::Ready => Some(PipelineState::Ready),
        gst::State::Paused => Some(PipelineState::Paused),
        gst::State::Playing => Some(PipelineState::Playing),
        _ => None,
    }
}

fn translate(message: &gst::Message) -> Message {
    use gst::MessageView;

    match message.view() {
        MessageView::Eos(_) => Message::Eos,
        MessageView::Error(e) => Message::Error {
            source: message_source(message),
            message: e.error().to_string(),
            detail: e.debug().map(|d| d.to_string()),
        },
        MessageView::Warning(w) => Message::Warning {
            source: message_source(message),
            message: w.error().to_string(),
        },
        MessageView::StateChanged(sc) => {
            match (map_state(sc.old()), map_state(sc.current())) {
                (Some(old), Some(new)) => Message::StateChanged {
                    source: message_source(message),
                    old,
                    new,
                },
                _ => Message::Other,
            }
        }
        MessageView::StreamStatus(ss) => {
            let (status, _owner) = ss.get();
            Message::StreamStatus {
                kind: format!("{:?}", status),
            }
        }
        _ => Message::Other,
    }
}
