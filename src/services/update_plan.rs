use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::domain::identifier::TicketId;
use crate::services::issue_tracker::UpdateOutcome;

/// Remote writes collected for one update, plus the fields that had to be
/// skipped because the backend cannot express them.
#[derive(Debug)]
pub struct UpdatePlan {
    label: &'static str,
    payload: Map<String, Value>,
    fields: Vec<String>,
    warnings: Vec<String>,
}

impl UpdatePlan {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            payload: Map::new(),
            fields: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn set(&mut self, field: &str, remote_key: &str, value: impl Into<Value>) {
        self.payload.insert(remote_key.to_string(), value.into());
        self.fields.push(field.to_string());
    }

    pub fn skip(&mut self, field: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(backend = self.label, field, "skipping field: {reason}");
        self.warnings.push(format!("{field}: {reason}"));
    }

    pub fn has_writes(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Payload flattened to form fields; nulls never reach the wire.
    pub fn form_pairs(&self) -> Vec<(String, String)> {
        self.payload
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::Null => return None,
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                Some((key.clone(), text))
            })
            .collect()
    }

    pub fn log_dry_run(&self, id: &TicketId, wire: &Value) {
        info!(backend = self.label, %id, payload = %wire, "dry run: skipping remote write");
    }

    /// Call after the write (if any) went through.
    pub fn finish(self, id: &TicketId, wire: Value, dry_run: bool) -> UpdateOutcome {
        let label = self.label;
        let message = if self.fields.is_empty() && self.warnings.is_empty() {
            format!("{label} issue {id} is already up to date")
        } else if self.fields.is_empty() {
            format!(
                "nothing to write for {label} issue {id}; {} field(s) skipped",
                self.warnings.len()
            )
        } else if dry_run {
            format!(
                "[dry run] would update {label} issue {id}: {}",
                self.fields.join(", ")
            )
        } else {
            format!("updated {label} issue {id}: {}", self.fields.join(", "))
        };

        UpdateOutcome {
            success: true,
            simulated: dry_run,
            message,
            updated_fields: self.fields,
            warnings: self.warnings,
            payload: wire,
        }
    }
}
