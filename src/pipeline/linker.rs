// Pad and link negotiation
//
// Static chains link stage-to-stage in declared order. The muxer inputs are
// request pads acquired per build; if anything fails after a request pad was
// handed out, every acquired pad is returned to the muxer before the error
// propagates, so no dangling request pad survives a failed build.

use log::debug;

use crate::engine::{PadHandle, Pipeline, StageRef};
use crate::error::{BuildError, BuildResult};

/// Negotiates connections between stages on one pipeline
pub struct PadLinker<'a> {
    pipeline: &'a dyn Pipeline,
}

impl<'a> PadLinker<'a> {
    pub fn new(pipeline: &'a dyn Pipeline) -> Self {
        Self { pipeline }
    }

    /// Link a chain of stages in declared order
    ///
    /// Fails on the first refused pair, naming both stages.
    pub fn link_chain(&self, stages: &[&StageRef]) -> BuildResult<()> {
        for pair in stages.windows(2) {
            let (upstream, downstream) = (&pair[0], &pair[1]);
            self.pipeline
                .link(upstream.as_ref(), downstream.as_ref())
                .map_err(|_| BuildError::link(upstream.name(), downstream.name()))?;
            debug!("linked {} -> {}", upstream.name(), downstream.name());
        }
        Ok(())
    }

    /// Connect parser outputs to the muxer's request pads
    ///
    /// `inputs` pairs each upstream stage with the muxer pad template its
    /// `src` pad should feed. Acquired pads are released again if any later
    /// acquisition or pad link fails.
    pub fn link_into_muxer(
        &self,
        muxer: &StageRef,
        inputs: &[(&StageRef, &str)],
    ) -> BuildResult<()> {
        let mut acquired: Vec<PadHandle> = Vec::new();

        let outcome = self.try_link_into_muxer(muxer, inputs, &mut acquired);
        if outcome.is_err() {
            for pad in &acquired {
                // Rollback; the original error stays the interesting one.
                let _ = muxer.release_request_pad(pad);
            }
        }
        outcome
    }

    fn try_link_into_muxer(
        &self,
        muxer: &StageRef,
        inputs: &[(&StageRef, &str)],
        acquired: &mut Vec<PadHandle>,
    ) -> BuildResult<()> {
        for (upstream, template) in inputs {
            let mux_pad = muxer
                .request_pad(template)
                .map_err(|_| BuildError::pad_request(muxer.name(), *template))?;
            acquired.push(mux_pad.clone());

            let src_pad = upstream
                .static_pad("src")
                .map_err(|_| BuildError::pad_request(upstream.name(), "src"))?;
            self.pipeline
                .link_pads(&src_pad, &mux_pad)
                .map_err(|_| BuildError::pad_link(src_pad.to_string(), mux_pad.to_string()))?;
            debug!("linked {} -> {}", src_pad, mux_pad);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::{SimEngine, SimOp};
    use crate::engine::MediaEngine;

    fn harness() -> (SimEngine, crate::engine::PipelineRef, StageRef, StageRef, StageRef) {
        let engine = SimEngine::new();
        let pipeline = engine.create_pipeline("p").unwrap();
        let video_parser = engine.create_stage("h264parse", "h264-parser").unwrap();
        let audio_parser = engine.create_stage("aacparse", "aac-parser").unwrap();
        let muxer = engine.create_stage("flvmux", "flv-mux").unwrap();
        (engine, pipeline, video_parser, audio_parser, muxer)
    }

    #[test]
    fn chain_link_names_failing_pair() {
        let engine = SimEngine::new();
        let pipeline = engine.create_pipeline("p").unwrap();
        let a = engine.create_stage("videoconvert", "a").unwrap();
        let b = engine.create_stage("videoscale", "b").unwrap();
        let c = engine.create_stage("capsfilter", "c").unwrap();
        engine.fail_link("b", "c");

        let linker = PadLinker::new(pipeline.as_ref());
        let err = linker.link_chain(&[&a, &b, &c]).unwrap_err();
        match err {
            BuildError::Link { upstream, downstream } => {
                assert_eq!(upstream, "b");
                assert_eq!(downstream, "c");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn muxer_links_both_branches() {
        let (engine, pipeline, video_parser, audio_parser, muxer) = harness();
        let linker = PadLinker::new(pipeline.as_ref());
        linker
            .link_into_muxer(&muxer, &[(&video_parser, "video"), (&audio_parser, "audio")])
            .unwrap();
        assert!(engine.outstanding_request_pads().len() == 2);
        assert!(engine.operations().iter().any(|op| matches!(
            op,
            SimOp::LinkPads { src, sink }
                if src == "h264-parser:src" && sink == "flv-mux:video"
        )));
    }

    #[test]
    fn failed_second_acquisition_releases_first_pad() {
        let (engine, pipeline, video_parser, audio_parser, muxer) = harness();
        engine.fail_request_pad("flv-mux", "audio");

        let linker = PadLinker::new(pipeline.as_ref());
        let err = linker
            .link_into_muxer(&muxer, &[(&video_parser, "video"), (&audio_parser, "audio")])
            .unwrap_err();
        assert!(matches!(err, BuildError::PadRequest { ref stage, ref pad }
            if stage == "flv-mux" && pad == "audio"));
        assert!(engine.outstanding_request_pads().is_empty());
    }

    #[test]
    fn failed_pad_link_releases_every_acquired_pad() {
        let (engine, pipeline, video_parser, audio_parser, muxer) = harness();
        engine.fail_link("aac-parser", "flv-mux");

        let linker = PadLinker::new(pipeline.as_ref());
        let err = linker
            .link_into_muxer(&muxer, &[(&video_parser, "video"), (&audio_parser, "audio")])
            .unwrap_err();
        assert!(matches!(err, BuildError::PadLink { .. }));
        assert!(engine.outstanding_request_pads().is_empty());
    }
}
