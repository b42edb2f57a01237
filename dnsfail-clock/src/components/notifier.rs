//! Audible feedback for a reset.

use crate::common::ResetSource;
use crate::metrics::ResetMetrics;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Something that announces a reset.
///
/// Implementations must be best-effort: they never fail the reset and should
/// return quickly, doing any slow work in the background.
pub trait Notifier: Send + Sync {
    fn notify(&self, source: ResetSource);
}

/// Marks a playback as running; clears the mark when dropped.
#[derive(Debug)]
struct PlaybackGuard(Arc<AtomicBool>);

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Plays a WAV file through `aplay`, one playback at a time.
#[derive(Debug, Clone)]
pub struct AplayNotifier {
    audio_file: PathBuf,
    device: Option<String>,
    timeout: Duration,
    metrics: Arc<ResetMetrics>,
    playing: Arc<AtomicBool>,
}

impl AplayNotifier {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a notifier for `audio_file`. An empty `device` selects the
    /// system default output.
    pub fn new(audio_file: impl Into<PathBuf>, device: &str, metrics: Arc<ResetMetrics>) -> Self {
        let device = device.trim();
        Self {
            audio_file: audio_file.into(),
            device: (!device.is_empty()).then(|| device.to_string()),
            timeout: Self::DEFAULT_TIMEOUT,
            metrics,
            playing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claims the player, or returns `None` while another playback runs.
    fn begin_playback(&self) -> Option<PlaybackGuard> {
        self.playing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PlaybackGuard(Arc::clone(&self.playing)))
    }

    /// The command line that will be executed.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(device) = &self.device {
            args.push("-D".to_string());
            args.push(device.clone());
        }
        args.push(self.audio_file.display().to_string());
        args
    }

    async fn play(
        args: Vec<String>,
        timeout: Duration,
        metrics: Arc<ResetMetrics>,
        _guard: PlaybackGuard,
    ) {
        debug!("Playing audio: aplay {}", args.join(" "));
        let mut command = Command::new("aplay");
        command
            .args(&args)
            // aplay wants a writable HOME and runtime dir even when run by a service user.
            .env("HOME", "/tmp")
            .env("XDG_RUNTIME_DIR", "/tmp")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => debug!("Audio playback completed"),
            Ok(Ok(output)) => {
                metrics.record_audio_error();
                error!(
                    "Audio playback failed ({}): {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(Err(e)) => {
                metrics.record_audio_error();
                error!("Audio playback error: {}", e);
            }
            Err(_) => {
                metrics.record_audio_error();
                error!("Audio playback timed out after {:?}", timeout);
            }
        }
    }
}

impl Notifier for AplayNotifier {
    fn notify(&self, source: ResetSource) {
        if !self.audio_file.exists() {
            warn!(
                "Audio file not found: {}; skipping {} reset sound.",
                self.audio_file.display(),
                source
            );
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available; skipping {} reset sound.", source);
            return;
        };
        let Some(guard) = self.begin_playback() else {
            debug!("Reset sound already playing; skipping {} reset sound.", source);
            return;
        };
        let args = self.command_args();
        let timeout = self.timeout;
        let metrics = Arc::clone(&self.metrics);
        runtime.spawn(Self::play(args, timeout, metrics, guard));
    }
}
