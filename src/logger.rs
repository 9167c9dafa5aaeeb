//! Tracing subscriber setup for the runner and the worker processes.

use std::{fs::File, io, sync::Mutex};

use anyhow::Context;
use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

use crate::configuration::Configuration;

/// Installs the global tracing subscriber described by `configuration`.
///
/// Logs go to a timestamped file named after `prefix` when logging to file is enabled,
/// otherwise to stderr in verbose mode. Does nothing when both are disabled.
pub fn init_logger(configuration: &Configuration, prefix: &str) -> anyhow::Result<()> {
    let (writer, level) = if configuration.log {
        let file_name = get_log_file_name(prefix)?;
        let file = File::create(&file_name)
            .with_context(|| format!("could not create log file '{file_name}'"))?;
        (BoxMakeWriter::new(Mutex::new(file)), Level::TRACE)
    } else if configuration.verbose {
        (BoxMakeWriter::new(io::stderr), Level::INFO)
    } else {
        return Ok(());
    };

    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
            .context("invalid log timestamp format")?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).context(
        "Could not set global default tracing subscriber. Consider disabling logs if you are already setting a subscriber.",
    )
}

fn get_log_file_name(prefix: &str) -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]:[minute]:[second]")
        .context("invalid log file name format")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let stamp = now.format(&format).context("could not format log file name")?;
    Ok(format!("{prefix}_{stamp}_log.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_names_carry_the_prefix() {
        let name = get_log_file_name("bot_3").unwrap();
        assert!(name.starts_with("bot_3_"));
        assert!(name.ends_with("_log.txt"));
    }

    #[test]
    fn disabled_logging_installs_nothing() {
        let configuration = Configuration::new().with_verbose(false).with_log(false);
        assert!(init_logger(&configuration, "unused").is_ok());
    }
}
