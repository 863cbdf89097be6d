use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogSettings;

const FALLBACK_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "session-engine";

/// Flushes the plan log file on drop; hold it until the process exits.
pub struct PlanLogGuard {
    _guard: WorkerGuard,
}

fn daily_appender(settings: &LogSettings) -> Option<Result<RollingFileAppender, InitError>> {
    let dir = settings.file_dir.as_deref()?;
    Some(
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(dir),
    )
}

/// Console logs go to stderr because stdout carries the plan JSON. A daily
/// file layer is added when a log directory is configured.
pub fn init_tracing(settings: &LogSettings) -> Option<PlanLogGuard> {
    let env_filter =
        EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER));

    let (file_writer, guard, file_error) = match daily_appender(settings) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard), None)
        }
        Some(Err(err)) => (None, None, Some(err)),
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(file_writer.map(|writer| {
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
        }))
        .init();

    if let Some(err) = file_error {
        tracing::warn!(
            error = %err,
            dir = ?settings.file_dir,
            "file logging disabled, could not open log directory"
        );
    }

    guard.map(|guard| PlanLogGuard { _guard: guard })
}
