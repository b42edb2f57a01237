//! The loop that keeps the display current.

use super::{DisplaySurface, DrawError, Frame};
use crate::common::Timestamp;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, trace, warn};

/// How often the display is refreshed when nothing else happens.
pub const FRAME_INTERVAL: Duration = Duration::from_secs(1);

/// Redraws the elapsed time once per second and right after every reset.
///
/// The loop only ever reads the origin.
pub struct RenderLoop {
    surface: Box<dyn DisplaySurface>,
    origin_rx: watch::Receiver<Timestamp>,
    frame_interval: Duration,
}

impl RenderLoop {
    pub fn new(surface: Box<dyn DisplaySurface>, origin_rx: watch::Receiver<Timestamp>) -> Self {
        Self {
            surface,
            origin_rx,
            frame_interval: FRAME_INTERVAL,
        }
    }

    /// Draws one frame for `now`.
    ///
    /// A failed redraw is logged and swallowed; a lost display handle is
    /// returned to the caller.
    pub fn render_once(&mut self, now: Timestamp) -> Result<(), DrawError> {
        let origin = *self.origin_rx.borrow_and_update();
        let frame = Frame::elapsed(now, origin);
        trace!("Drawing frame for origin {}", origin);
        match self.surface.draw(&frame) {
            Ok(()) => Ok(()),
            Err(e @ DrawError::HandleLost(_)) => Err(e),
            Err(e) => {
                warn!("Display error, retrying next frame: {}", e);
                Ok(())
            }
        }
    }

    /// Runs until shutdown (then clears the display) or until the display is lost.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DrawError> {
        info!("Starting display loop...");
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut origin_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                changed = self.origin_rx.changed(), if origin_open => {
                    if changed.is_err() {
                        // The timer is gone; keep showing the last origin.
                        origin_open = false;
                        continue;
                    }
                    self.render_once(Utc::now())?;
                }
                _ = ticker.tick() => {
                    self.render_once(Utc::now())?;
                }
            }
        }

        info!("Clearing display...");
        if let Err(e) = self.surface.clear() {
            warn!("Could not clear display on shutdown: {}", e);
        }
        Ok(())
    }
}
