// nagare: camera/microphone RTMP live pusher
//
// Captures local camera and microphone input, stamps the video with the
// current wall-clock time, encodes to H.264/AAC, muxes into FLV and pushes
// the result to an RTMP server until interrupted. The media processing
// itself is delegated to an engine behind `engine::MediaEngine`; this crate
// owns graph construction, link negotiation, message dispatch, and the
// ordered startup/shutdown sequence around it.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod overlay;
pub mod pipeline;

pub use config::StreamSettings;
pub use error::{BuildError, PushError, PushResult};
pub use lifecycle::LifecycleController;
