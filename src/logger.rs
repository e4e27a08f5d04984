//! Logging setup for the fitting binary and benches
//!
//! The library itself only emits `tracing` events: iteration tables at `debug`
//! (`info` for verbose fits), rejected steps at `debug`, errors at `error`. This
//! module installs a subscriber that prints them as
//!
//! ```text
//! [LEVEL YYYY-MM-DD HH:MM:SS module] message      INFO / WARN / ERROR
//! [LEVEL YYYY-MM-DD HH:MM:SS file:line] message   DEBUG / TRACE
//! ```

use tracing::Level;

/// Initialize the tracing subscriber at INFO (overridable through `RUST_LOG`).
///
/// # Example
/// ```no_run
/// use asteria_lm::init_logger;
///
/// init_logger();
/// tracing::info!("Calibration started");
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=debug cargo run --features cli --bin fit_synthetic
/// RUST_LOG=asteria_lm=trace cargo run --features cli --bin fit_synthetic
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level.
///
/// A second call is a no-op, so tests and benches may call it freely.
pub fn init_logger_with_level(default_level: Level) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .event_format(BracketFormatter)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
}

/// Event formatter producing bracketed, colored prefixes
struct BracketFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for BracketFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use chrono::Local;

        let metadata = event.metadata();
        let level = *metadata.level();

        let tag = match level {
            Level::ERROR => "\x1b[31mERROR\x1b[0m",
            Level::WARN => "\x1b[33mWARN\x1b[0m",
            Level::INFO => "\x1b[32mINFO\x1b[0m",
            Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
            Level::TRACE => "\x1b[35mTRACE\x1b[0m",
        };
        write!(
            writer,
            "[{} {} ",
            tag,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        match (level, metadata.file()) {
            (Level::DEBUG | Level::TRACE, Some(file)) => {
                let filename = file.rsplit('/').next().unwrap_or(file);
                write!(writer, "{}:{}", filename, metadata.line().unwrap_or(0))?;
            }
            _ => write!(writer, "{}", metadata.target())?,
        }
        write!(writer, "] ")?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
