//! One-time initialization of the process-wide log subscriber.
//!
//! Logs go to stderr. Stdout belongs to the terminal display, which repaints
//! the whole screen every frame.

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Builds the `fmt` subscriber writing to `writer`.
///
/// `RUST_LOG` takes precedence over `level` when set.
fn subscriber<W>(level: &str, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer)
        .finish()
}

/// Installs the subscriber on stderr.
///
/// Calling this more than once is harmless: only the first call installs
/// anything, and the return value says whether this call was the one.
pub fn init(level: &str) -> bool {
    tracing::subscriber::set_global_default(subscriber(level, std::io::stderr)).is_ok()
}
