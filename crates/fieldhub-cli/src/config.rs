//! Config file loading – reads the JSON document named on the command line.
//!
//! The document loaded here is the one the gateway later rewrites.  Runtime
//! overrides are applied to a *copy* so they never end up on disk.

use std::fs;
use std::path::{Path, PathBuf};

use fieldhub_types::ConfigDocument;
use thiserror::Error;

/// Used when no path is given on the command line.
pub const DEFAULT_PATH: &str = "./config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The config path: the first argument, or [`DEFAULT_PATH`].
pub fn path_from_args(mut args: impl Iterator<Item = String>) -> PathBuf {
    args.next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PATH))
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
/// An empty file is an empty document.
pub fn load_from(path: &Path) -> Result<Option<ConfigDocument>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(Some(ConfigDocument::default()));
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
}

/// Apply `FIELDHUB_*` environment variable overrides to `config`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FIELDHUB_HTTP_HOST` | `http.host` |
/// | `FIELDHUB_HTTP_PORT` | `http.port` |
/// | `FIELDHUB_WS_PORT` | `ws.port` |
/// | `FIELDHUB_PING_INTERVAL` | `ws.pingInterval` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(config: &mut ConfigDocument) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides(config: &mut ConfigDocument, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("FIELDHUB_HTTP_HOST") {
        config.http.host = host;
    }
    if let Some(v) = var("FIELDHUB_HTTP_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        config.http.port = port;
    }
    if let Some(v) = var("FIELDHUB_WS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        config.ws.port = Some(port);
    }
    if let Some(v) = var("FIELDHUB_PING_INTERVAL")
        && let Ok(ms) = v.parse::<i64>()
    {
        config.ws.ping_interval = ms;
    }
}
