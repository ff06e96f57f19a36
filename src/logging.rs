//! File logging for the terminal front end. Anything written to stderr would tear the UI.

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::Mutex,
};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::config_dir, error::ConfigError};

pub const LOG_ENV: &str = "AB_PREVIEW_LOG";
const DEFAULT_FILTER: &str = "ab_preview=info";

/// Install the global subscriber. Returns where the log goes.
pub fn init() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    fs::create_dir_all(&dir)?;
    let path = dir.join("ab-preview.log");
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into());
    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init();
    Ok(path)
}
