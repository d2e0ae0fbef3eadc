//! Tracing setup for the actor.
//!
//! Development logs go to stdout in the pretty format. Production writes
//! three sinks:
//!
//! | Sink                          | Format  | Events                      |
//! |-------------------------------|---------|-----------------------------|
//! | `<log dir>/hitoe.<date>`      | JSON    | everything but reports      |
//! | `<log dir>/reports.<date>`    | JSON    | [`REPORT_TARGET`] only      |
//! | stdout                        | compact | everything, no ANSI colors  |

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{Metadata, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::report::REPORT_TARGET;

/// Environment variable holding the default filter when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "HITOE_LOG_LEVEL";

const LOG_FILE_PREFIX: &str = "hitoe";
const REPORT_FILE_PREFIX: &str = "reports";

static GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Installs the global subscriber.
///
/// The filter comes from `RUST_LOG`, else `HITOE_LOG_LEVEL`, else `info`.
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed, the log directory cannot
/// be created, or a global subscriber is already installed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    if is_production {
        init_production(env_filter, &log_directory())
    } else {
        init_development(env_filter)
    }
}

fn is_report(metadata: &Metadata<'_>) -> bool {
    metadata.target() == REPORT_TARGET
}

/// One flattened JSON line per report, nothing else.
fn reports_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_writer(writer)
        .with_filter(filter_fn(is_report))
}

fn daily(dir: &Path, prefix: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let (writer, guard) =
        tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, dir, prefix));
    guards.push(guard);
    writer
}

fn init_production(env_filter: EnvFilter, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let mut guards = Vec::with_capacity(3);
    let events = daily(log_dir, LOG_FILE_PREFIX, &mut guards);
    let reports = daily(log_dir, REPORT_FILE_PREFIX, &mut guards);
    let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let events_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(events)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter_fn(|metadata| !is_report(metadata)));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(events_layer)
        .with(reports_layer(reports))
        .with(stdout_layer)
        .try_init()?;

    let _ = GUARDS.set(guards);
    Ok(())
}

fn init_development(env_filter: EnvFilter) -> anyhow::Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()?;
    Ok(())
}

/// Directory of the production log files.
#[must_use]
pub fn log_directory() -> PathBuf {
    if cfg!(target_os = "linux") {
        return PathBuf::from("/var/log/hitoe");
    }
    directories::ProjectDirs::from("", "", "hitoe")
        .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;
    use tracing::info;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reports_layer_keeps_only_reports() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber =
            tracing_subscriber::registry().with(reports_layer(move || writer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            info!(target: REPORT_TARGET, heart_rate = 72, "Report");
            info!("Heartrate streaming");
        });

        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("\"heart_rate\":72"));
        assert!(output.contains("\"target\":\"hitoe::report\""));
        assert!(!output.contains("Heartrate streaming"));
    }

    #[test]
    fn test_log_directory_is_valid_path() {
        let dir = log_directory();
        assert!(dir.ends_with("logs") || dir.ends_with("hitoe"));
    }

    #[test]
    fn test_second_init_reports_the_conflict() {
        // The first call may lose to another test's subscriber.
        let _ = init(false);
        assert!(init(false).is_err());
    }
}
