// Logging for the myna runtime.
//
// Built on the `tracing` ecosystem. The engine itself only emits events;
// installing a subscriber is the embedding application's call, and the
// helpers here cover the common setups:
//
// ```rust
// use myna::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// // or tuned by hand
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: false,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// `init_development`, `init_production`, and `init_test` preset the
// config for those environments; `init_with_file` adds a plain-text file
// layer next to the console one. Every entry point is guarded by a
// process-wide `Once`, so calling them repeatedly (as tests do) is safe.

use std::io;
use std::sync::Once;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the myna logging setup.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display.
    pub level: Level,
    /// Emit JSON instead of human-readable lines.
    pub json_format: bool,
    /// Include file and line information.
    pub show_file_line: bool,
    /// Include thread names and ids.
    pub show_thread_info: bool,
    /// Include timestamps.
    pub show_time: bool,
    /// Extra target filters ("target=level,target2=level2,...").
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

// Only the first initialization call in the process takes effect.
static INIT: Once = Once::new();

/// Initializes the global tracing subscriber with `config`.
///
/// Safe to call multiple times; only the first call does anything.
/// `RUST_LOG` directives layer on top of the configured level.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

        if let Some(filters) = config.target_filters {
            for filter in filters.split(',') {
                if let Ok(directive) = filter.parse() {
                    env_filter = env_filter.add_directive(directive);
                }
            }
        }

        let fmt_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let registry = tracing_subscriber::registry().with(env_filter);

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(registry.with(fmt::layer().json().flatten_event(true)))
        } else {
            Box::new(registry.with(fmt_layer))
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` in append mode as a boxed log writer, creating the file
/// if needed.
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Initializes logging with both a console layer and a plain-text file
/// layer at `log_file`.
///
/// Console output honors the ANSI setting; file output never uses colors
/// and always carries file/line and thread information.
pub fn init_with_file(config: LogConfig, log_file: &str) -> Result<(), io::Error> {
    // Fail early if the path is unusable; the layer below falls back to
    // stderr on later open failures.
    file_writer(log_file)?;

    INIT.call_once(|| {
        let env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

        let console_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(std::io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// Default setup: INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// Development setup: DEBUG level overall, TRACE for port dispatch,
/// colors, file/line information.
pub fn init_development() {
    let config = LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        show_time: true,
        target_filters: Some("myna=debug,myna::port=trace".to_string()),
    };
    init(config);
}

/// Production setup: INFO level, JSON output for log aggregators, no
/// file/line information.
pub fn init_production() {
    let config = LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    };
    init(config);
}

/// Test setup: WARN level only, compact plain text, no timestamps.
pub fn init_test() {
    let config = LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    };
    init(config);
}

/// Creates a span covering one agent's activity.
///
/// ```rust
/// let span = myna::agent_span!("Counter", "agent://local/7");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! agent_span {
    ($kind:expr, $id:expr) => {
        tracing::info_span!("agent", kind = $kind, id = %$id)
    };
    ($kind:expr, $id:expr, $($fields:tt)*) => {
        tracing::info_span!("agent", kind = $kind, id = %$id, $($fields)*)
    };
}

/// Creates a span covering the handling of one message tag.
#[macro_export]
macro_rules! message_span {
    ($tag:expr) => {
        tracing::debug_span!("message", tag = %$tag)
    };
    ($tag:expr, $($fields:tt)*) => {
        tracing::debug_span!("message", tag = %$tag, $($fields)*)
    };
}

/// Logs an agent lifecycle event (spawned, stopped, faulted, restarted).
#[macro_export]
macro_rules! log_lifecycle {
    ($kind:expr, $id:expr, $event:expr) => {
        tracing::info!(kind = $kind, id = %$id, event = $event);
    };
    ($kind:expr, $id:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(kind = $kind, id = %$id, event = $event, $($fields)*);
    };
}

/// The current global tracing dispatcher, for handing to threads spawned
/// outside the tokio runtime.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

// Re-exported for convenience at call sites that only import `logging`.
pub use tracing::{debug, error, info, trace, warn};
