//! Coercion helpers turning raw confdict strings into typed values.
//!
//! Every helper fails with [`InitError::Config`] when the input cannot be
//! coerced; none of them retry or fall back silently.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use regex::Regex;

use crate::confdict::ConfSection;
use crate::error::InitError;

/// Convert a confdict string to a boolean.
///
/// Accepts `1`/`yes`/`true`/`on` and `0`/`no`/`false`/`off`, case-insensitive.
pub fn parse_bool(value: &str) -> Result<bool, InitError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(InitError::config(format!(
            "value {value:?} does not describe a boolean"
        ))),
    }
}

/// Convert a newline-separated confdict value to a list of trimmed,
/// non-empty strings.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

static INTERVAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*([a-z]+)\s*$").unwrap());

/// Convert a human readable time interval (`3s`, `5 milliseconds`,
/// `2 hours`, `365days`) to a [`Duration`].
///
/// The bare string `0` is accepted and means a zero interval.
pub fn parse_time_interval(value: &str) -> Result<Duration, InitError> {
    if value.trim() == "0" {
        return Ok(Duration::ZERO);
    }
    let invalid = || {
        InitError::config(format!(
            "value {value:?} does not describe a valid time interval"
        ))
    };
    let lowered = value.to_ascii_lowercase();
    let captures = INTERVAL_RE.captures(&lowered).ok_or_else(invalid)?;
    let amount: u64 = captures[1].parse().map_err(|_| invalid())?;
    let unit_ms: u64 = match &captures[2] {
        "ms" | "millisecond" | "milliseconds" => 1,
        "s" | "second" | "seconds" => 1_000,
        "m" | "min" | "minute" | "minutes" => 60_000,
        "h" | "hour" | "hours" => 3_600_000,
        "d" | "day" | "days" => 86_400_000,
        _ => return Err(invalid()),
    };
    let millis = amount.checked_mul(unit_ms).ok_or_else(invalid)?;
    Ok(Duration::from_millis(millis))
}

/// Convert a confdict string to a [`NaiveDateTime`].
///
/// Accepts an all-digits UNIX timestamp in seconds (interpreted as UTC),
/// `%Y-%m-%d %H:%M`, `%Y-%m-%d %H:%M:%S`, and the seconds form with a
/// fraction suffix that is read as an integer number of microseconds.
pub fn parse_datetime(value: &str) -> Result<NaiveDateTime, InitError> {
    let invalid = || InitError::config(format!("value {value:?} does not describe a datetime"));
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = trimmed.parse().map_err(|_| invalid())?;
        return chrono::DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(invalid);
    }
    let (base, fraction) = match trimmed.split_once('.') {
        Some((base, fraction)) => (base, Some(fraction)),
        None => (trimmed, None),
    };
    let parsed = NaiveDateTime::parse_from_str(base, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(base, "%Y-%m-%d %H:%M"))
        .map_err(|_| invalid())?;
    match fraction {
        None => Ok(parsed),
        Some(fraction) => {
            let micros: u32 = fraction.parse().map_err(|_| invalid())?;
            parsed.with_nanosecond(micros.checked_mul(1_000).ok_or_else(invalid)?)
                .ok_or_else(invalid)
        }
    }
}

/// Extract a host and port from `value`.
///
/// Valid inputs are `hostname` and `hostname:port`. An empty value is
/// replaced by `fallback` entirely; a value without a port borrows the
/// fallback's port.
pub fn parse_host_port(value: &str, fallback: Option<&str>) -> Result<(String, u16), InitError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        let fallback = fallback.ok_or_else(|| {
            InitError::config("empty host:port value and no fallback given".to_string())
        })?;
        return parse_host_port(fallback, None);
    }
    let (host, port) = match trimmed.split_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => {
            let fallback = fallback.ok_or_else(|| {
                InitError::config(format!("value {value:?} contains no port definition"))
            })?;
            let (_, port) = parse_host_port(fallback, None)?;
            (trimmed.to_string(), port.to_string())
        }
    };
    let port: u16 = port.parse().map_err(|_| {
        InitError::config(format!("value {port:?} is not a valid port number"))
    })?;
    Ok((host, port))
}

/// Extract all values of `conf` whose key starts with `prefix`, with the
/// prefix stripped from the resulting keys.
pub fn extract_conf(conf: &ConfSection, prefix: &str) -> ConfSection {
    extract_conf_with(conf, prefix, &ConfSection::new())
}

/// Same as [`extract_conf`], layered on top of `defaults`.
pub fn extract_conf_with(conf: &ConfSection, prefix: &str, defaults: &ConfSection) -> ConfSection {
    let mut result = defaults.clone();
    for (key, value) in conf {
        if let Some(stripped) = key.strip_prefix(prefix) {
            result.insert(stripped.to_string(), value.clone());
        }
    }
    result
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Name of the snapshot file [`init_cache_folder`] maintains with autopurge.
const CONF_SNAPSHOT_FILE: &str = "__conf__";

/// Initialize the cache folder configured under `key`.
///
/// Creates the folder when absent (expanding a leading `~`) and returns its
/// canonical path. With `autopurge`, the rest of the section is persisted to
/// a `__conf__` file inside the folder; when that snapshot differs from the
/// previous run's, the folder's contents are wiped first, assuming they were
/// derived from the old configuration.
pub fn init_cache_folder(
    conf: &ConfSection,
    key: &str,
    autopurge: bool,
) -> Result<PathBuf, InitError> {
    let raw = conf
        .get(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| InitError::config(format!("no cache folder configured under {key:?}")))?;
    let folder = expand_home(raw.trim());
    fs::create_dir_all(&folder)?;
    let folder = fs::canonicalize(&folder)?;
    if fs::metadata(&folder)?.permissions().readonly() {
        return Err(InitError::config(format!(
            "configured cache folder {} is not writable",
            folder.display()
        )));
    }
    if !autopurge {
        return Ok(folder);
    }

    let mut rest = conf.clone();
    rest.remove(key);
    let snapshot = serde_json::to_string(&rest)
        .map_err(|e| InitError::config(format!("cannot serialize confdict snapshot: {e}")))?;
    let snapshot_file = folder.join(CONF_SNAPSHOT_FILE);
    if let Ok(previous) = fs::read_to_string(&snapshot_file) {
        if previous != snapshot {
            purge_folder(&folder)?;
        }
    }
    fs::write(&snapshot_file, &snapshot)?;
    Ok(folder)
}

/// Delete everything inside `folder`, leaving the folder itself in place.
fn purge_folder(folder: &Path) -> Result<(), InitError> {
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
