use async_trait::async_trait;
use serde::Serialize;

use crate::config::BackendSettings;
use crate::domain::fields::TicketFields;
use crate::domain::heading::HeadingStyle;
use crate::domain::identifier::TicketId;
use crate::domain::ticket::{LocalTicket, Metadata};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Key of the backend's section in the config file.
    pub name: &'static str,
    pub label: &'static str,
    pub file_prefix: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub heading: HeadingStyle,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub fields: TicketFields,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub simulated: bool,
    pub message: String,
    pub updated_fields: Vec<String>,
    pub warnings: Vec<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self, label: &str) -> AppResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "{label} is not configured: {}",
                self.errors.join("; ")
            )))
        }
    }
}

#[async_trait]
pub trait IssueTrackerPlugin: Send + Sync {
    fn descriptor(&self) -> &'static PluginDescriptor;

    /// Accepts a bare identifier or a browser URL of the configured tracker.
    fn resolve_identifier(&self, raw: &str, settings: &BackendSettings) -> AppResult<TicketId>;

    async fn fetch(
        &self,
        settings: &BackendSettings,
        id: &TicketId,
        options: &FetchOptions,
    ) -> AppResult<LocalTicket>;

    async fn update(
        &self,
        settings: &BackendSettings,
        id: &TicketId,
        request: &UpdateRequest,
    ) -> AppResult<UpdateOutcome>;

    fn validate(&self, settings: &BackendSettings) -> ValidationReport;

    /// `None` when the front matter does not say which remote issue the file
    /// belongs to.
    fn extract_identifier(&self, front_matter: &Metadata) -> Option<TicketId>;

    /// Checks that must pass before any update touches the network.
    fn check_update(
        &self,
        settings: &BackendSettings,
        id: &TicketId,
        request: &UpdateRequest,
    ) -> AppResult<()> {
        let label = self.descriptor().label;
        self.validate(settings).into_result(label)?;
        if request.fields.is_empty() {
            return Err(AppError::Validation(format!(
                "no fields to update for {label} issue {id}"
            )));
        }
        Ok(())
    }
}
