//! Logging initialisation via tracing-subscriber.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::confdict::{Confdict, LOG_LEVEL_KEY, META_SECTION};
use crate::error::InitError;

/// Initialise the global tracing subscriber.
///
/// `level` accepts standard level strings: `"error"`, `"warn"`, `"info"`,
/// `"debug"`, `"trace"`. `RUST_LOG` takes precedence; `level` is the
/// fallback. Fails when the subscriber is already installed.
pub fn init(level: &str) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| InitError::config(format!("invalid log level '{level}': {e}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| InitError::config(format!("failed to set subscriber: {e}")))
}

/// Parse a log level string into a [`LevelFilter`], returning an error on
/// unrecognised values. Useful for validating config before initialising.
pub fn parse_level(level: &str) -> Result<LevelFilter, InitError> {
    if level.is_empty() {
        return Err(InitError::config("log level must not be empty"));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| InitError::config(format!("unrecognised log level: '{level}'")))
}

/// Initialise logging from the confdict's meta `log_level` key.
///
/// A bogus configured level is an error; an already-installed subscriber
/// is not (repeated bootstrap runs share the process-global logger).
pub(crate) fn init_from_confdict(confdict: &Confdict) -> Result<(), InitError> {
    let level = confdict
        .get(META_SECTION, LOG_LEVEL_KEY)
        .unwrap_or("info");
    parse_level(level)?;
    let _ = init(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_levels_parse() {
        for level in &["error", "warn", "info", "debug", "trace"] {
            assert!(parse_level(level).is_ok(), "expected '{level}' to be valid");
        }
    }

    #[test]
    fn invalid_level_errors() {
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("").is_err());
        assert!(parse_level("INFO_LEVEL").is_err());
    }

    #[test]
    fn confdict_with_bogus_level_errors() {
        let mut confdict = Confdict::new();
        confdict.insert(META_SECTION, LOG_LEVEL_KEY, "verbose");
        assert!(init_from_confdict(&confdict).is_err());
    }

    #[test]
    fn confdict_without_level_defaults() {
        // May already be installed by a sibling test — both outcomes are fine.
        assert!(init_from_confdict(&Confdict::new()).is_ok());
    }
}
