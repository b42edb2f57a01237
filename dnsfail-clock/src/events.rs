//! Defines the event types broadcast by the clock engine.
//!
//! Anything interested in what the engine is doing (the daemon's log
//! listener, tests) subscribes to this stream instead of polling state.

use crate::common::{ResetSource, Timestamp};
use std::net::SocketAddr;

/// Events related to the lifecycle and state of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    /// Fired once when the engine's `run` loop begins.
    EngineStarted { origin: Timestamp },
    /// Fired once when the engine's `run` loop is about to exit.
    EngineShutdown,
    /// Fired after every reset, whichever surface triggered it.
    TimerReset {
        origin: Timestamp,
        source: ResetSource,
    },
    /// The input line is being polled.
    InputMonitorStarted { pin: u32 },
    /// The input line could not be acquired; button resets are unavailable.
    InputMonitorDisabled { reason: String },
    /// The control surface is accepting connections.
    ControlListening { addr: SocketAddr },
    /// The control surface could not be started.
    ControlDisabled { reason: String },
}
