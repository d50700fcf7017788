// Logger initialization

use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "bucket_browser=debug,tower_http=debug";

/// Install the global subscriber: `RUST_LOG` filtering, stdout output and,
/// when `LOG_DIR` is set, a daily rolling log file.
///
/// Keep the returned guard alive for the life of the process so buffered
/// file output is flushed.
pub fn init_logger() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let log_dir = env::var("LOG_DIR").ok().filter(|dir| !dir.trim().is_empty());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, "bucket-browser.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();

            tracing::info!(log_dir = %dir, "File logging enabled");
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            None
        }
    }
}
