//! Client settings, read from a TOML file.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use transport::{DEFAULT_MAX_MESSAGE_SIZE, requests::InitializeArguments, types::ThreadId};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebuggerConfig {
    pub client_id: String,
    pub client_name: String,
    pub adapter_id: String,
    pub locale: Option<String>,
    /// Give up on a reply after this long. Unset waits forever.
    pub request_timeout_ms: Option<u64>,
    pub max_message_size: usize,
    /// Events buffered per subscriber before the slowest one starts lagging.
    pub event_capacity: usize,
    /// Thread used for execution requests before any event named one.
    pub default_thread_id: ThreadId,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            client_id: "kdap".to_string(),
            client_name: "kdap".to_string(),
            adapter_id: "python".to_string(),
            locale: None,
            request_timeout_ms: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            event_capacity: 256,
            default_thread_id: 1,
        }
    }
}

impl DebuggerConfig {
    /// Location of the user's configuration file, if the platform has a
    /// configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kdap").join("config.toml"))
    }

    /// Load the user's configuration, falling back to defaults when no file
    /// exists.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load_from(path),
            _ => {
                tracing::debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading configuration");
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn initialize_arguments(&self) -> InitializeArguments {
        InitializeArguments {
            client_id: self.client_id.clone(),
            client_name: self.client_name.clone(),
            adapter_id: self.adapter_id.clone(),
            path_format: "path".to_string(),
            lines_start_at1: true,
            columns_start_at1: true,
            supports_variable_type: true,
            supports_variable_paging: true,
            supports_run_in_terminal_request: false,
            locale: self.locale.clone(),
        }
    }
}
