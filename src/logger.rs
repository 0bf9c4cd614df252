use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

/// Installs the global `tracing` subscriber, writing to `path` or to a time-stamped file in the
/// working directory.
///
/// Fails if the file cannot be created or a global subscriber is already set.
pub fn init_logger(path: Option<&Path>) -> anyhow::Result<PathBuf> {
    if tracing::dispatcher::has_been_set() {
        anyhow::bail!("kernel error: a global tracing subscriber is already set");
    }
    let file_name = match path {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(get_log_file_name()?),
    };
    let file = File::create(&file_name)
        .with_context(|| format!("kernel error: creating log file {}", file_name.display()))?;
    let writer = BoxMakeWriter::new(file);
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
            .context("kernel error: log timestamp format")?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).context(
        "Could not set global default tracing subscriber. Consider disabling logs if you are already setting a subscriber.",
    )?;
    Ok(file_name)
}

fn get_log_file_name() -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]:[minute]:[second]_kernel_log.txt")
        .context("kernel error: log file name format")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&format)
        .context("kernel error: formatting log file name")
}
