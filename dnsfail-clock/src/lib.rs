//! # dnsfail
//!
//! A wall display that counts the time since DNS last broke.
//!
//! The clock shows how long it has been since the last reset, in years, months,
//! days, hours, minutes and seconds. A physical button or an HTTP request resets
//! it to zero, plays a sound, and persists the new origin so that restarts and
//! power loss do not lose the count.
//!
//! ## Core Concepts
//!
//! - **TimerState**: The single origin timestamp. [`timer::TimerState::reset`]
//!   is the only operation that changes it, whichever input triggered it.
//! - **StateStore**: A small JSON record written atomically, so a crash mid-save
//!   leaves either the old record or the new one.
//! - **Outputs**: The render loop redraws once a second and on every reset; the
//!   control surface reports status and metrics over HTTP.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dnsfail::prelude::*;
//! use dnsfail::display::terminal::TerminalSurface;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. Load the configuration, falling back to defaults.
//!     let config = DnsfailConfig::load(&DnsfailConfig::resolve_path(None));
//!
//!     // 2. Create the engine. This restores the saved origin.
//!     let engine = DnsfailEngine::new(config);
//!
//!     // 3. Subscribe to system events before starting the engine.
//!     let mut system_events = engine.subscribe_system_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = system_events.recv().await {
//!             println!("Received System Event: {:?}", event);
//!         }
//!     });
//!
//!     // 4. Run the engine. It will shut down on Ctrl+C.
//!     engine.run(Box::new(TerminalSurface::stdout(80))).await?;
//!
//!     Ok(())
//! }
//! ```

pub const APP_NAME: &str = "DNS Fail Clock";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod common;
pub mod components;
pub mod config;
pub mod control;
pub mod display;
pub mod engine;
pub mod events;
pub mod formatter;
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod timer;

/// A prelude module for easy importing of the most common types.
pub mod prelude {
    pub use crate::common::{ResetSource, Timestamp};
    pub use crate::config::DnsfailConfig;
    pub use crate::control::ControlClient;
    pub use crate::engine::DnsfailEngine;
    pub use crate::events::SystemEvent;
    pub use crate::formatter::format_elapsed;
    pub use crate::persistence::StateStore;
    pub use crate::timer::TimerState;
}
