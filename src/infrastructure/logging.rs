use std::io::{self, IsTerminal};

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

use crate::{config::AppConfig, infrastructure::directories::ResolvedPaths};

const LOG_FILE: &str = "pacifiers.log";

/// Applied on top of LOG_LEVEL unless RUST_LOG takes over entirely.
const QUIET_TARGETS: [&str; 4] = [
    "sqlx=warn",
    "hyper=info",
    "reqwest=info",
    "tokio_cron_scheduler=info",
];

static INIT: OnceCell<()> = OnceCell::new();
static GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

pub fn init_tracing(config: &AppConfig, paths: &ResolvedPaths) -> Result<()> {
    INIT.get_or_try_init::<_, anyhow::Error>(|| {
        let appender = tracing_appender::rolling::daily(&paths.logs_dir, LOG_FILE);
        let (file_writer, guard) = tracing_appender::non_blocking(appender);
        let _ = GUARD.set(guard);

        // stdout is the outbound message stream, so the console gets stderr.
        let console_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_ansi(io::stderr().is_terminal());

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(build_filter(&config.logging.level))
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::info!(
            logs = %paths.logs_dir.display(),
            file = LOG_FILE,
            page = %config.page.url,
            "tracing initialized"
        );
        Ok(())
    })?;
    Ok(())
}

fn build_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let base = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    QUIET_TARGETS
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(base, EnvFilter::add_directive)
}
