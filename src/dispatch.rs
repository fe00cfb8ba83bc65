// Bus message dispatch
//
// Consumes the pipeline's bus stream and maps each notification to a control
// decision. Handlers never block: everything here is a log line and, for EOS
// and errors, an idempotent stop request on the shared token. State-change
// chatter from individual stages is ignored; only the top-level pipeline's
// transitions are reported, compared by identity so duplicate display names
// cannot confuse the check.

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{Message, ObjectId};

/// What the dispatcher decided to do with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not interesting; nothing happens
    Ignore,
    /// Worth a log line, no state change
    LogOnly,
    /// Fatal or final; stop is requested
    Stop,
}

/// Maps engine notifications to control decisions
pub struct MessageDispatcher {
    pipeline_id: ObjectId,
    stop: CancellationToken,
}

impl MessageDispatcher {
    pub fn new(pipeline_id: ObjectId, stop: CancellationToken) -> Self {
        Self { pipeline_id, stop }
    }

    /// Classify a message against the dispatch table
    pub fn disposition(&self, message: &Message) -> Disposition {
        match message {
            Message::Eos => Disposition::Stop,
            Message::Error { .. } => Disposition::Stop,
            Message::Warning { .. } => Disposition::LogOnly,
            Message::StateChanged { source, .. } => {
                if source.id == self.pipeline_id {
                    Disposition::LogOnly
                } else {
                    Disposition::Ignore
                }
            }
            Message::StreamStatus { .. } => Disposition::LogOnly,
            Message::Other => Disposition::Ignore,
        }
    }

    /// Handle one message; returns whether to keep listening
    ///
    /// The flag is true except during active teardown, so a message that
    /// itself requests the stop still reports true and the loop winds down on
    /// the next delivery.
    pub fn dispatch(&self, message: &Message) -> bool {
        let tearing_down = self.stop.is_cancelled();

        match message {
            Message::Eos => {
                info!("end of stream, stopping push");
                self.stop.cancel();
            }
            Message::Error {
                source,
                message,
                detail,
            } => {
                error!("error from {}: {}", source.name, message);
                if let Some(detail) = detail {
                    error!("debug detail: {detail}");
                }
                // Always fatal for a live push; no retry.
                self.stop.cancel();
            }
            Message::Warning { source, message } => {
                warn!("warning from {}: {}", source.name, message);
            }
            Message::StateChanged { source, old, new } => {
                if source.id == self.pipeline_id {
                    info!("pipeline state change: {old} -> {new}");
                }
            }
            Message::StreamStatus { kind } => {
                debug!("stream status: {kind}");
            }
            Message::Other => {}
        }

        !tearing_down
    }

    /// Consume the bus until teardown or the engine closes the stream
    pub async fn run(self, mut bus: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = bus.recv().await {
            if !self.dispatch(&message) {
                break;
            }
        }
    }
}
