use crate::config::{AppConfig, BackendSettings};
use crate::error::{AppError, AppResult};
use crate::services::{IssueTrackerPlugin, registry};

#[derive(Clone)]
pub struct AppContext {
    pub plugin: &'static dyn IssueTrackerPlugin,
    pub settings: BackendSettings,
}

impl AppContext {
    pub fn new(plugin: &'static dyn IssueTrackerPlugin, settings: BackendSettings) -> Self {
        Self { plugin, settings }
    }

    /// Picks the backend once, up front. Unknown names stop here, before any
    /// engine code runs.
    pub fn for_backend(config: &AppConfig, requested: Option<&str>) -> AppResult<Self> {
        let name = config.backend_name(requested)?;
        let plugin = registry::lookup(&name).ok_or_else(|| {
            AppError::Configuration(format!(
                "unknown backend '{name}'; known backends: {}",
                registry::backend_names().join(", ")
            ))
        })?;
        let settings = config.settings(plugin.descriptor().name)?.clone();
        Ok(Self::new(plugin, settings))
    }
}
