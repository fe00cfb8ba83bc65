use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use nagare::config::StreamSettings;
use nagare::engine::EngineRef;
use nagare::error::PushError;
use nagare::lifecycle::LifecycleController;

const EXIT_BUILD_FAILED: u8 = 2;
const EXIT_PLAY_FAILED: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let settings = match StreamSettings::load_or_default(Path::new("nagare.toml")) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_BUILD_FAILED);
        }
    };

    println!("nagare {}", env!("CARGO_PKG_VERSION"));
    println!("target:     {}", settings.url);
    println!(
        "resolution: {}x{} @ {} fps, {} kbps video / {} kbps audio",
        settings.width,
        settings.height,
        settings.framerate,
        settings.video_bitrate_kbps,
        settings.audio_bitrate_kbps
    );
    println!("press Ctrl+C to stop");

    let engine = match build_engine() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut controller = LifecycleController::new(engine, settings);
    match controller.run().await {
        Ok(()) => {
            println!("push stopped");
            ExitCode::SUCCESS
        }
        Err(e @ (PushError::Build(_) | PushError::Configuration(_))) => {
            eprintln!("{e}");
            ExitCode::from(EXIT_BUILD_FAILED)
        }
        Err(e @ PushError::StateChange { .. }) => {
            eprintln!("{e}");
            ExitCode::from(EXIT_PLAY_FAILED)
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "gst-engine")]
fn build_engine() -> Result<EngineRef, PushError> {
    let engine = nagare::engine::gst::GstEngine::new()?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "gst-engine"))]
fn build_engine() -> Result<EngineRef, PushError> {
    log::warn!("built without the gst-engine feature; dry run on the simulated engine, no media is produced");
    Ok(Arc::new(nagare::engine::sim::SimEngine::new()))
}
