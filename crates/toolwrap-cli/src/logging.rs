use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal};
use std::sync::Arc;

use toolwrap_core::BootstrapConfig;
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::{self, Format, FormatEvent, FormatFields, Full, Writer};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{self as tracing_fmt, FmtContext};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

const CRATES: [&str; 4] = [
    "toolwrap",
    "toolwrap_core",
    "toolwrap_domain",
    "toolwrap_python",
];

/// Console lines, prefixed with `[DryRun] ` while simulating.
struct ConsoleFormat {
    dry_run: bool,
    inner: Format<Full, ()>,
}

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        if self.dry_run {
            writer.write_str("[DryRun] ")?;
        }
        self.inner.format_event(ctx, writer, event)
    }
}

fn crate_filter(level: &str) -> EnvFilter {
    let directives = CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(directives)
}

/// Open the run log in append mode.
///
/// Nothing is created in dry-run or when the source root is missing; the
/// run reports those conditions itself.
pub fn open_log_file(config: &BootstrapConfig) -> io::Result<Option<File>> {
    if !config.source_root.is_dir() {
        return Ok(None);
    }
    if !config.venv_root.is_dir() {
        if config.dry_run {
            return Ok(None);
        }
        fs::create_dir_all(&config.venv_root)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_file())
        .map(Some)
}

/// Console at info (debug with `-v`), plus the log file at info when open.
///
/// With `--json` the console moves to stderr so stdout carries only the report.
pub fn init_tracing(verbose: u8, dry_run: bool, json: bool, log_file: Option<File>) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let (writer, ansi) = if json {
        (BoxMakeWriter::new(io::stderr), io::stderr().is_terminal())
    } else {
        (BoxMakeWriter::new(io::stdout), io::stdout().is_terminal())
    };
    let console = tracing_fmt::layer()
        .with_ansi(ansi)
        .with_writer(writer)
        .event_format(ConsoleFormat {
            dry_run,
            inner: format::format().with_target(false).without_time(),
        })
        .with_filter(crate_filter(level));

    let file = log_file.map(|file| {
        tracing_fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Arc::new(file))
            .with_filter(LevelFilter::INFO)
    });

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init();
}
