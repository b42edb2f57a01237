use anyhow::Result;
use dnsfail::display::terminal::TerminalSurface;
use dnsfail::prelude::*;
use dnsfail::{logging, APP_NAME, VERSION};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Work out which config file to read.
    let config_path = DnsfailConfig::resolve_path(std::env::args_os().nth(1).map(PathBuf::from));

    // 2. Load it. Missing or bad keys fall back to their defaults.
    let config = DnsfailConfig::load(&config_path);

    // 3. Initialize structured logging at the configured level.
    logging::init(&config.log_level);
    info!("{} v{} starting with config {}", APP_NAME, VERSION, config_path.display());

    // 4. Create the engine. This restores the persisted origin.
    let brightness = config.brightness;
    let engine = DnsfailEngine::new(config);

    // 5. Log what the engine reports while it runs.
    spawn_event_listeners(&engine);

    // 6. Open the display. Without it there is nothing to run for.
    let surface = TerminalSurface::stdout(brightness);

    // 7. Run until Ctrl+C or SIGTERM.
    if let Err(e) = engine.run(Box::new(surface)).await {
        error!("Fatal error: {:#}", e);
        return Err(e);
    }

    Ok(())
}

fn spawn_event_listeners(engine: &DnsfailEngine) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            match event {
                SystemEvent::InputMonitorDisabled { reason }
                | SystemEvent::ControlDisabled { reason } => {
                    warn!("[SYSTEM] degraded: {}", reason)
                }
                other => info!("[SYSTEM] => {:?}", other),
            }
        }
    });
}
