//! Store and instance configuration.
//!
//! Everything is explicit: a [`StoreConfig`] is handed to
//! [`DocumentStore::new`](crate::DocumentStore::new) and nothing is read from
//! process-wide state after that. [`StoreConfig::from_env`] is a convenience
//! for launchers that pass settings through `WBS_*` variables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default location of the shared document.
pub const DEFAULT_DATA_PATH: &str = "./data/wbs_data.json";
/// How long a writer waits for the lock before reporting `Locked`.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
/// Age after which a lock marker is considered abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);
/// Sleep between lock attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Shortest poll interval a coordinator will use.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

const ENV_DATA_PATH: &str = "WBS_DATA_PATH";
const ENV_LOCK_TIMEOUT_MS: &str = "WBS_LOCK_TIMEOUT_MS";
const ENV_LOCK_STALE_MS: &str = "WBS_LOCK_STALE_MS";
const ENV_LOCK_POLL_MS: &str = "WBS_LOCK_POLL_MS";
const ENV_MODE: &str = "WBS_MODE";
const ENV_USER_ID: &str = "WBS_USER_ID";

/// Where the document lives and how writers coordinate on it.
///
/// ```rust
/// use std::time::Duration;
/// use wbs_store::StoreConfig;
///
/// let config = StoreConfig::new("data/wbs.json")
///     .lock_timeout(Duration::from_secs(5))
///     .pretty(false);
/// assert_eq!(config.lock_path().file_name().unwrap(), "wbs.json.lock");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path to the JSON document.
    pub path: PathBuf,
    /// How long a writer waits for the lock.
    pub lock_timeout: Duration,
    /// Marker age after which it is reclaimed.
    pub stale_after: Duration,
    /// Backoff between lock attempts.
    pub poll_interval: Duration,
    /// Indented rather than compact JSON.
    pub pretty: bool,
}

impl StoreConfig {
    /// Defaults for a document at `path`: 10s timeout, 30s staleness, 100ms
    /// polling, pretty-printed output.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
            poll_interval: DEFAULT_POLL_INTERVAL,
            pretty: true,
        }
    }

    /// Build from the process environment. See [`from_vars`](Self::from_vars).
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build from `WBS_DATA_PATH`, `WBS_LOCK_TIMEOUT_MS`, `WBS_LOCK_STALE_MS`
    /// and `WBS_LOCK_POLL_MS`. Unset or empty variables keep their defaults;
    /// unparseable ones are a [`Error::Config`].
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::new(DEFAULT_DATA_PATH);
        for (key, value) in vars {
            let value = value.into();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                ENV_DATA_PATH => config.path = PathBuf::from(value),
                ENV_LOCK_TIMEOUT_MS => {
                    config.lock_timeout = parse_millis(ENV_LOCK_TIMEOUT_MS, &value)?;
                }
                ENV_LOCK_STALE_MS => {
                    config.stale_after = parse_millis(ENV_LOCK_STALE_MS, &value)?;
                }
                ENV_LOCK_POLL_MS => {
                    config.poll_interval = parse_millis(ENV_LOCK_POLL_MS, &value)?;
                }
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Fails with [`Error::Config`] if `stale_after` or `poll_interval` is
    /// zero. A zero `lock_timeout` is allowed and means a single attempt.
    pub fn validate(&self) -> Result<()> {
        if self.stale_after.is_zero() {
            return Err(Error::Config("stale_after must be greater than zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be greater than zero".into()));
        }
        Ok(())
    }

    /// How long `write` waits for the lock (default 10s).
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Marker age after which it's reclaimed (default 30s). Must not be zero.
    pub fn stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    /// Backoff between lock attempts (default 100ms). Must not be zero.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Indented JSON (default) or compact.
    pub fn pretty(mut self, yes: bool) -> Self {
        self.pretty = yes;
        self
    }

    /// Path of the lock marker: the document path with `.lock` appended.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "lock")
    }

    /// Path of the scratch file used for atomic replace.
    #[must_use]
    pub fn tmp_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "tmp")
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| Error::Config(format!("{key}={value:?}: {e}")))
}

/// Which kind of server this process is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Manages users and the shared document.
    #[default]
    Admin,
    /// A participant's own server.
    User,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Mode::Admin),
            "user" => Ok(Mode::User),
            other => Err(Error::Config(format!("unknown mode {other:?}"))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::Admin => "admin",
            Mode::User => "user",
        })
    }
}

/// Store settings plus who this process is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Shared document settings.
    pub store: StoreConfig,
    /// Admin or user server.
    pub mode: Mode,
    /// User this instance acts for, in user mode.
    pub user_id: Option<String>,
}

impl InstanceConfig {
    /// Admin instance on `store`.
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            mode: Mode::Admin,
            user_id: None,
        }
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Store settings from [`StoreConfig::from_vars`] plus `WBS_MODE` and
    /// `WBS_USER_ID`.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let vars: Vec<(String, String)> = vars
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_owned(), v.into()))
            .collect();
        let mut config = Self::new(StoreConfig::from_vars(vars.iter().cloned())?);
        for (key, value) in vars {
            match key.as_str() {
                ENV_MODE if !value.is_empty() => config.mode = value.parse()?,
                ENV_USER_ID if !value.is_empty() => config.user_id = Some(value),
                _ => {}
            }
        }
        Ok(config)
    }
}
