// Pipeline construction
//
// Declares the full stage set, applies the validated configuration, and
// assembles the graph:
//
//   video: source -> convert -> scale -> caps -> overlay -> encoder -> parser
//   audio: source -> convert -> resample -> encoder -> parser
//   both parsers -> muxer (request pads) -> rtmp sink
//
// Stage creation is all-or-nothing: every factory runs first, and if any
// failed, the build aborts with one combined diagnostic before anything is
// registered with the container. No network connection is opened here; that
// happens only when PLAYING is requested later.

use log::debug;

use crate::config::StreamSettings;
use crate::engine::{MediaEngine, PipelineRef, PropertyValue, StageRef};
use crate::error::{BuildError, BuildResult};
use crate::pipeline::linker::PadLinker;

/// Display name of the top-level container
pub const PIPELINE_NAME: &str = "camera-streamer-pipeline";

/// Every stage of the graph as (engine type identifier, stage name)
pub const DECLARED_STAGES: [(&str, &str); 14] = [
    ("autovideosrc", "video-source"),
    ("videoconvert", "video-convert"),
    ("videoscale", "video-scale"),
    ("capsfilter", "video-caps"),
    ("textoverlay", "timestamp-overlay"),
    ("x264enc", "video-encoder"),
    ("h264parse", "h264-parser"),
    ("autoaudiosrc", "audio-source"),
    ("audioconvert", "audio-convert"),
    ("audioresample", "audio-resample"),
    ("avenc_aac", "audio-encoder"),
    ("aacparse", "aac-parser"),
    ("flvmux", "flv-mux"),
    ("rtmpsink", "rtmp-sink"),
];

/// Result of a successful build
///
/// The pipeline owns every stage; the overlay handle is kept separately so
/// the timestamp task can reach its `text` property.
pub struct BuiltPipeline {
    pub pipeline: PipelineRef,
    pub overlay: StageRef,
}

impl std::fmt::Debug for BuiltPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltPipeline").finish_non_exhaustive()
    }
}

/// The complete stage set, held only between creation and registration
struct StageSet {
    video_source: StageRef,
    video_convert: StageRef,
    video_scale: StageRef,
    caps_filter: StageRef,
    overlay: StageRef,
    video_encoder: StageRef,
    video_parser: StageRef,
    audio_source: StageRef,
    audio_convert: StageRef,
    audio_resample: StageRef,
    audio_encoder: StageRef,
    audio_parser: StageRef,
    muxer: StageRef,
    sink: StageRef,
}

impl StageSet {
    fn all(&self) -> Vec<StageRef> {
        vec![
            self.video_source.clone(),
            self.video_convert.clone(),
            self.video_scale.clone(),
            self.caps_filter.clone(),
            self.overlay.clone(),
            self.video_encoder.clone(),
            self.video_parser.clone(),
            self.audio_source.clone(),
            self.audio_convert.clone(),
            self.audio_resample.clone(),
            self.audio_encoder.clone(),
            self.audio_parser.clone(),
            self.muxer.clone(),
            self.sink.clone(),
        ]
    }
}

/// Assembles one coherent media graph from the validated settings
pub struct PipelineBuilder<'a> {
    engine: &'a dyn MediaEngine,
    settings: &'a StreamSettings,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(engine: &'a dyn MediaEngine, settings: &'a StreamSettings) -> Self {
        Self { engine, settings }
    }

    /// Build, configure, and fully link the pipeline
    pub fn build(&self) -> BuildResult<BuiltPipeline> {
        let pipeline = self
            .engine
            .create_pipeline(PIPELINE_NAME)
            .map_err(|e| BuildError::Pipeline(e.to_string()))?;

        let stages = self.create_stages()?;
        self.configure(&stages)?;

        pipeline
            .add_all(&stages.all())
            .map_err(|e| BuildError::Registration(e.to_string()))?;

        let linker = PadLinker::new(pipeline.as_ref());
        linker.link_chain(&[
            &stages.video_source,
            &stages.video_convert,
            &stages.video_scale,
            &stages.caps_filter,
            &stages.overlay,
            &stages.video_encoder,
            &stages.video_parser,
        ])?;
        linker.link_chain(&[
            &stages.audio_source,
            &stages.audio_convert,
            &stages.audio_resample,
            &stages.audio_encoder,
            &stages.audio_parser,
        ])?;
        linker.link_into_muxer(
            &stages.muxer,
            &[
                (&stages.video_parser, "video"),
                (&stages.audio_parser, "audio"),
            ],
        )?;
        linker.link_chain(&[&stages.muxer, &stages.sink])?;

        Ok(BuiltPipeline {
            pipeline,
            overlay: stages.overlay.clone(),
        })
    }

    /// Run every stage factory, then check the whole batch
    ///
    /// All factories run even after a failure so the diagnostic lists every
    /// stage that is missing, not just the first.
    fn create_stages(&self) -> BuildResult<StageSet> {
        let mut missing = Vec::new();
        let mut created = Vec::with_capacity(DECLARED_STAGES.len());
        for (kind, name) in DECLARED_STAGES {
            match self.engine.create_stage(kind, name) {
                Ok(stage) => created.push(stage),
                Err(e) => missing.push(format!("{name} ({kind}): {e}")),
            }
        }
        if !missing.is_empty() {
            return Err(BuildError::StageCreation { missing });
        }

        // Length is exactly DECLARED_STAGES.len() here, in declared order.
        let mut created = created.into_iter();
        let mut next = || created.next().unwrap();
        Ok(StageSet {
            video_source: next(),
            video_convert: next(),
            video_scale: next(),
            caps_filter: next(),
            overlay: next(),
            video_encoder: next(),
            video_parser: next(),
            audio_source: next(),
            audio_convert: next(),
            audio_resample: next(),
            audio_encoder: next(),
            audio_parser: next(),
            muxer: next(),
            sink: next(),
        })
    }

    /// Apply the typed configuration records to their stages
    fn configure(&self, stages: &StageSet) -> BuildResult<()> {
        let s = self.settings;

        set(&stages.caps_filter, "caps", PropertyValue::Caps(s.video_caps()))?;

        let (halign, valign) = s.overlay.placement.alignment();
        for (key, value) in [
            ("halignment", PropertyValue::enum_name(halign)),
            ("valignment", PropertyValue::enum_name(valign)),
            ("xpad", PropertyValue::Int(s.overlay.xpad as i32)),
            ("ypad", PropertyValue::Int(s.overlay.ypad as i32)),
            ("font-desc", PropertyValue::str(&s.overlay.font)),
            ("color", PropertyValue::UInt(s.overlay.color)),
            ("shaded-background", PropertyValue::Bool(s.overlay.shaded_background)),
            ("text", PropertyValue::str(&s.overlay.initial_text)),
        ] {
            set(&stages.overlay, key, value)?;
        }
        if let (Ok(xpad), Ok(ypad)) = (
            stages.overlay.property("xpad"),
            stages.overlay.property("ypad"),
        ) {
            debug!("overlay placement: xpad={xpad} ypad={ypad}");
        }

        set(
            &stages.video_encoder,
            "bitrate",
            PropertyValue::UInt(s.video_bitrate_kbps),
        )?;
        if s.encoder.zero_latency {
            set(&stages.video_encoder, "tune", PropertyValue::enum_name("zerolatency"))?;
        }
        for (key, value) in [
            ("speed-preset", PropertyValue::enum_name(&s.encoder.speed_preset)),
            ("key-int-max", PropertyValue::UInt(s.encoder.keyframe_interval)),
            ("bframes", PropertyValue::UInt(s.encoder.bframes)),
            ("byte-stream", PropertyValue::Bool(s.encoder.byte_stream)),
            ("threads", PropertyValue::UInt(s.encoder.threads)),
        ] {
            set(&stages.video_encoder, key, value)?;
        }

        set(
            &stages.audio_encoder,
            "bitrate",
            PropertyValue::Int(s.audio_bitrate_kbps as i32),
        )?;

        set(&stages.muxer, "streamable", PropertyValue::Bool(s.muxer.streamable))?;

        for (key, value) in [
            ("location", PropertyValue::str(&s.url)),
            ("sync", PropertyValue::Bool(s.sink.sync)),
            ("async", PropertyValue::Bool(s.sink.async_state_change)),
            ("max-lateness", PropertyValue::Int64(s.sink.max_lateness)),
        ] {
            set(&stages.sink, key, value)?;
        }

        Ok(())
    }
}

fn set(stage: &StageRef, key: &str, value: PropertyValue) -> BuildResult<()> {
    stage
        .set_property(key, value)
        .map_err(|e| BuildError::configuration(stage.name(), e.to_string()))
}
