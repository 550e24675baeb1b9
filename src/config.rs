use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::domain::fields::TicketFields;
use crate::error::{AppError, AppResult};
use crate::infra::retry::{
    DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_UPDATE_ATTEMPTS,
    RetryPolicy,
};

pub const CONFIG_ENV_VAR: &str = "TICKETSYNC_CONFIG";
pub const CONFIG_FILE_NAME: &str = ".ticketsync.yml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub default_backend: Option<String>,
    pub backends: BTreeMap<String, BackendSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Status name to remote status id, for backends that only accept ids.
    pub status_ids: BTreeMap<String, u64>,
    pub priority_ids: BTreeMap<String, u64>,
    pub defaults: TicketFields,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials<'a> {
    ApiKey(&'a str),
    Basic {
        username: &'a str,
        password: &'a str,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub fetch_attempts: u32,
    pub update_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            fetch_attempts: DEFAULT_MAX_ATTEMPTS,
            update_attempts: DEFAULT_UPDATE_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn fetch_policy(&self) -> RetryPolicy {
        self.apply(RetryPolicy::default().with_max_attempts(self.fetch_attempts))
    }

    pub fn update_policy(&self) -> RetryPolicy {
        self.apply(RetryPolicy::for_update().with_max_attempts(self.update_attempts))
    }

    fn apply(&self, policy: RetryPolicy) -> RetryPolicy {
        policy.with_delays(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl AppConfig {
    /// Reads the YAML config from `explicit`, then `$TICKETSYNC_CONFIG`, then
    /// `.ticketsync.yml` under `workspace_hint`. Only an explicitly named file
    /// has to exist.
    pub fn load(explicit: Option<&Path>, workspace_hint: &Path) -> AppResult<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match env::var(CONFIG_ENV_VAR) {
                Ok(path) if !path.trim().is_empty() => (PathBuf::from(path), true),
                _ => (workspace_hint.join(CONFIG_FILE_NAME), false),
            },
        };

        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_yaml(&contents).map_err(|err| {
                AppError::Configuration(format!("{}: {err}", path.display()))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok(Self::default())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                AppError::Configuration(format!("config file {} not found", path.display())),
            ),
            Err(err) => Err(AppError::Io(err)),
        }
    }

    pub fn from_yaml(contents: &str) -> AppResult<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|err| AppError::Configuration(format!("invalid config: {err}")))
    }

    pub fn backend_name(&self, requested: Option<&str>) -> AppResult<String> {
        let name = requested
            .map(str::to_string)
            .or_else(|| self.default_backend.clone())
            .or_else(|| {
                (self.backends.len() == 1)
                    .then(|| self.backends.keys().next().cloned())
                    .flatten()
            })
            .ok_or_else(|| {
                AppError::Configuration(
                    "no backend selected; pass --backend or set default_backend".to_string(),
                )
            })?;
        Ok(name.trim().to_lowercase())
    }

    pub fn settings(&self, backend: &str) -> AppResult<&BackendSettings> {
        self.backends.get(backend).ok_or_else(|| {
            AppError::Configuration(format!("no settings configured for backend '{backend}'"))
        })
    }
}

impl BackendSettings {
    pub fn base_url(&self) -> Option<&str> {
        non_empty(&self.base_url).map(|url| url.trim_end_matches('/'))
    }

    /// A single token wins over a username/password pair.
    pub fn credentials(&self) -> Option<Credentials<'_>> {
        if let Some(key) = non_empty(&self.api_key) {
            return Some(Credentials::ApiKey(key));
        }
        match (non_empty(&self.username), non_empty(&self.password)) {
            (Some(username), Some(password)) => Some(Credentials::Basic { username, password }),
            _ => None,
        }
    }

    /// Presence checks shared by every backend. Never touches the network.
    pub fn missing_settings(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.base_url() {
            None => errors.push("base_url is required".to_string()),
            Some(url) => match Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => errors.push(format!(
                    "base_url must use http or https, got '{}'",
                    parsed.scheme()
                )),
                Err(err) => errors.push(format!("base_url '{url}' is not a valid URL: {err}")),
            },
        }

        let has_key = non_empty(&self.api_key).is_some();
        let has_user = non_empty(&self.username).is_some();
        let has_password = non_empty(&self.password).is_some();
        match (has_key, has_user, has_password) {
            (true, _, _) | (false, true, true) => {}
            (false, true, false) => {
                errors.push("username is set but password is missing".to_string())
            }
            (false, false, true) => {
                errors.push("password is set but username is missing".to_string())
            }
            (false, false, false) => {
                errors.push("either api_key or username and password are required".to_string())
            }
        }

        errors
    }

    pub fn status_id(&self, name: &str) -> Option<u64> {
        lookup_ignore_case(&self.status_ids, name)
    }

    pub fn priority_id(&self, name: &str) -> Option<u64> {
        lookup_ignore_case(&self.priority_ids, name)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn lookup_ignore_case(table: &BTreeMap<String, u64>, name: &str) -> Option<u64> {
    let name = name.trim();
    table
        .iter()
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}
