// Timestamp overlay refresh
//
// A single periodic task rewrites the overlay stage's `text` property with
// the current wall-clock time once per second. The write is one atomic
// property assignment with last-write-wins semantics, so no synchronization
// beyond the shared slot is needed. A tick that finds the slot empty (the
// pipeline is not built yet, or teardown already cleared it) does nothing and
// never cancels the task; only the controller's token stops it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::warn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{PropertyValue, StageRef};

/// Wall-clock rendering used on screen
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Shared handle to the overlay stage, if one currently exists
#[derive(Clone, Default)]
pub struct OverlaySlot {
    inner: Arc<Mutex<Option<StageRef>>>,
}

impl OverlaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the overlay stage after a successful build
    pub fn set(&self, stage: StageRef) {
        *self.inner.lock().unwrap() = Some(stage);
    }

    /// Drop the overlay reference during teardown
    pub fn clear(&self) {
        *self.inner.lock().unwrap() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_none()
    }

    fn get(&self) -> Option<StageRef> {
        self.inner.lock().unwrap().clone()
    }
}

/// Periodic task refreshing the on-screen timestamp
pub struct OverlayUpdater {
    slot: OverlaySlot,
    interval: Duration,
}

impl OverlayUpdater {
    pub fn new(slot: OverlaySlot) -> Self {
        Self {
            slot,
            interval: Duration::from_secs(1),
        }
    }

    /// Render a timestamp the way it appears on screen
    pub fn format_timestamp(now: DateTime<Local>) -> String {
        now.format(TIMESTAMP_FORMAT).to_string()
    }

    /// One refresh: write the current time, or do nothing without an overlay
    pub fn tick(slot: &OverlaySlot) {
        let Some(overlay) = slot.get() else {
            return;
        };
        let text = Self::format_timestamp(Local::now());
        if let Err(e) = overlay.set_property("text", PropertyValue::Str(text)) {
            warn!("overlay refresh failed: {e}");
        }
    }

    /// Run the refresh loop until the token is cancelled
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => Self::tick(&self.slot),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::{SimEngine, SimOp};
    use crate::engine::MediaEngine;
    use chrono::NaiveDateTime;

    #[test]
    fn timestamp_has_the_fixed_shape() {
        let rendered = OverlayUpdater::format_timestamp(Local::now());
        assert_eq!(rendered.len(), 19);
        NaiveDateTime::parse_from_str(&rendered, TIMESTAMP_FORMAT).unwrap();
    }

    #[test]
    fn tick_writes_text_while_slot_is_live() {
        let engine = SimEngine::new();
        let overlay = engine.create_stage("textoverlay", "timestamp-overlay").unwrap();
        let slot = OverlaySlot::new();
        slot.set(overlay);

        OverlayUpdater::tick(&slot);

        let wrote = engine.operations().iter().any(|op| {
            matches!(op, SimOp::SetProperty { stage, key, value }
                if stage == "timestamp-overlay"
                    && key == "text"
                    && NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).is_ok())
        });
        assert!(wrote);
    }

    #[test]
    fn tick_after_clear_is_a_silent_no_op() {
        let engine = SimEngine::new();
        let overlay = engine.create_stage("textoverlay", "timestamp-overlay").unwrap();
        let slot = OverlaySlot::new();
        slot.set(overlay);
        slot.clear();

        let before = engine.operations().len();
        OverlayUpdater::tick(&slot);
        assert_eq!(engine.operations().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn task_refreshes_periodically_and_stops_on_cancel() {
        let engine = SimEngine::new();
        let overlay = engine.create_stage("textoverlay", "timestamp-overlay").unwrap();
        let slot = OverlaySlot::new();
        slot.set(overlay);

        let cancel = CancellationToken::new();
        let task = OverlayUpdater::new(slot).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let writes = engine
            .operations()
            .iter()
            .filter(|op| matches!(op, SimOp::SetProperty { key, .. } if key == "text"))
            .count();
        assert!(writes >= 3);

        cancel.cancel();
        task.await.unwrap();
    }
}
