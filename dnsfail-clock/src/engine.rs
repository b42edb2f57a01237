//! The engine that wires the timer to its inputs and outputs and runs them.

use crate::components::button::InputMonitor;
use crate::components::input_line::{open_input_line, InputLine};
use crate::components::notifier::{AplayNotifier, Notifier};
use crate::config::DnsfailConfig;
use crate::control::{ControlContext, ControlServer};
use crate::display::render::RenderLoop;
use crate::display::DisplaySurface;
use crate::events::SystemEvent;
use crate::metrics::ResetMetrics;
use crate::persistence::StateStore;
use crate::timer::TimerState;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

/// How long background tasks get to wind down after the shutdown broadcast.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The main clock engine.
///
/// Owns the configuration and the shared timer, and drives the render loop,
/// the button monitor and the control surface until shutdown. Cloning gives
/// another handle to the same timer and event stream.
#[derive(Clone)]
pub struct DnsfailEngine {
    config: Arc<DnsfailConfig>,
    timer: Arc<TimerState>,
    system_event_sender: broadcast::Sender<SystemEvent>,
    shutdown_grace: Duration,
}

impl DnsfailEngine {
    /// Creates an engine from `config`, restoring the timer from disk and
    /// playing reset sounds through `aplay`.
    pub fn new(config: DnsfailConfig) -> Self {
        let metrics = Arc::new(ResetMetrics::new());
        let notifier: Arc<dyn Notifier> = Arc::new(AplayNotifier::new(
            config.audio_file.clone(),
            &config.audio_device,
            Arc::clone(&metrics),
        ));
        Self::with_notifier(config, notifier, metrics)
    }

    /// Like [`DnsfailEngine::new`] with a caller-supplied notifier.
    pub fn with_notifier(
        config: DnsfailConfig,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<ResetMetrics>,
    ) -> Self {
        let (system_event_sender, _) = broadcast::channel(64);
        let store = StateStore::new(config.persistence_file.clone());
        let timer = TimerState::initialize(store, notifier, metrics)
            .with_events(system_event_sender.clone());

        Self {
            config: Arc::new(config),
            timer: Arc::new(timer),
            system_event_sender,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    /// Overrides how long tasks get to stop after the shutdown broadcast.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn config(&self) -> &DnsfailConfig {
        &self.config
    }

    /// The shared timer; [`TimerState::reset`] is the only way to change it.
    pub fn timer(&self) -> &Arc<TimerState> {
        &self.timer
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_sender.subscribe()
    }

    /// Runs with the configured GPIO line until Ctrl+C or SIGTERM.
    pub async fn run(&self, surface: Box<dyn DisplaySurface>) -> Result<()> {
        let input = open_input_line(&self.config.gpio_chip, self.config.gpio_pin);
        self.run_until(surface, input, shutdown_signal()).await
    }

    /// Runs until `shutdown` completes or the display is lost.
    ///
    /// This method will:
    /// 1. Spawn the button monitor, if the input line could be opened.
    /// 2. Spawn the control surface, if enabled and bindable.
    /// 3. Spawn the render loop.
    /// 4. Wait for `shutdown` (or a fatal display error), then broadcast
    ///    shutdown to every task and wait for them to finish.
    pub async fn run_until(
        &self,
        surface: Box<dyn DisplaySurface>,
        input: Result<Box<dyn InputLine>>,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        info!("Engine starting up...");
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut background: Vec<JoinHandle<()>> = Vec::new();

        match input {
            Ok(line) => {
                let monitor = InputMonitor::new(line, Arc::clone(&self.timer));
                let rx = shutdown_tx.subscribe();
                background.push(tokio::spawn(
                    monitor.run(rx).instrument(info_span!("button")),
                ));
                self.emit(SystemEvent::InputMonitorStarted {
                    pin: self.config.gpio_pin,
                });
            }
            Err(e) => {
                error!("GPIO unavailable, button reset disabled: {:#}", e);
                error!("Try running: sudo chmod 660 {}", self.config.gpio_chip);
                self.emit(SystemEvent::InputMonitorDisabled {
                    reason: format!("{:#}", e),
                });
            }
        }

        if self.config.web_enabled {
            let context = ControlContext::new(Arc::clone(&self.timer), self.config.timezone);
            match ControlServer::bind(&self.config.web_addr(), context).await {
                Ok(server) => {
                    if let Ok(addr) = server.local_addr() {
                        self.emit(SystemEvent::ControlListening { addr });
                    }
                    let rx = shutdown_tx.subscribe();
                    background.push(tokio::spawn(
                        server.run(rx).instrument(info_span!("control")),
                    ));
                }
                Err(e) => {
                    warn!("Control surface disabled: {:#}", e);
                    self.emit(SystemEvent::ControlDisabled {
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        let render = RenderLoop::new(surface, self.timer.subscribe());
        let mut render_handle = tokio::spawn(
            render
                .run(shutdown_tx.subscribe())
                .instrument(info_span!("render")),
        );

        self.emit(SystemEvent::EngineStarted {
            origin: self.timer.get_origin(),
        });
        info!("Engine running. Press Ctrl+C to shut down.");

        let render_result = tokio::select! {
            _ = shutdown => {
                info!("Shutdown signal received. Broadcasting to all tasks...");
                shutdown_tx.send(()).ok();
                match tokio::time::timeout(self.shutdown_grace, &mut render_handle).await {
                    Ok(finished) => Some(finished),
                    Err(_) => {
                        warn!("Render loop did not stop in time; abandoning it.");
                        render_handle.abort();
                        None
                    }
                }
            }
            finished = &mut render_handle => {
                error!("Render loop stopped unexpectedly. Shutting down...");
                shutdown_tx.send(()).ok();
                Some(finished)
            }
        };

        for handle in background {
            if tokio::time::timeout(self.shutdown_grace, handle).await.is_err() {
                warn!("A background task did not stop in time.");
            }
        }

        self.emit(SystemEvent::EngineShutdown);
        info!("Engine has shut down.");

        match render_result {
            Some(finished) => finished
                .context("render loop panicked")?
                .context("display failed"),
            None => Ok(()),
        }
    }

    fn emit(&self, event: SystemEvent) {
        self.system_event_sender.send(event).ok();
    }
}

/// Resolves on Ctrl+C, or on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
