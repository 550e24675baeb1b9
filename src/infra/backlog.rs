use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::{BackendSettings, Credentials};
use crate::domain::fields::TicketFields;
use crate::domain::identifier::{self, IdPattern, TicketId};
use crate::domain::issue::{RemoteIssue, parse_remote_date};
use crate::domain::ticket::{LocalTicket, Metadata};
use crate::error::{AppError, AppResult};
use crate::infra::http::{HttpClient, RequestBody};
use crate::services::{
    FetchOptions, IssueTrackerPlugin, PluginDescriptor, UpdateOutcome, UpdatePlan, UpdateRequest,
    ValidationReport,
};

pub static DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "backlog",
    label: "Backlog",
    file_prefix: "backlog-",
};

const ID_PATTERN: IdPattern = IdPattern::ProjectKeyAfter("view");
const ID_KEY: &str = "key";

/// Backlog's built-in priorities. Unlike statuses they are the same in
/// every project.
const BUILTIN_PRIORITIES: [(&str, u64); 3] = [("high", 2), ("normal", 3), ("low", 4)];

pub struct BacklogPlugin;

struct Connection {
    base_url: String,
    api_key: String,
}

impl Connection {
    fn open(settings: &BackendSettings) -> AppResult<Self> {
        BacklogPlugin
            .validate(settings)
            .into_result(DESCRIPTOR.label)?;
        let (Some(base_url), Some(Credentials::ApiKey(api_key))) =
            (settings.base_url(), settings.credentials())
        else {
            return Err(AppError::Validation(
                "Backlog base_url and api_key are required".to_string(),
            ));
        };

        Ok(Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// The API key travels as a query parameter on every call.
    fn issue_url(&self, id: &TicketId) -> AppResult<String> {
        let mut url = Url::parse(&format!("{}/api/v2/issues/{}", self.base_url, id))
            .map_err(|err| AppError::Validation(format!("invalid Backlog issue URL: {err}")))?;
        url.query_pairs_mut().append_pair("apiKey", &self.api_key);
        Ok(url.into())
    }

    fn browse_url(&self, id: &TicketId) -> String {
        format!("{}/view/{}", self.base_url, id)
    }

    async fn read_issue(&self, client: &HttpClient, id: &TicketId) -> AppResult<RemoteIssue> {
        let issue: BacklogIssue = client
            .get(&self.issue_url(id)?, &HeaderMap::new())
            .await?
            .into_json("Backlog issue")?;
        Ok(issue.into_remote(self.browse_url(id)))
    }
}

impl BacklogPlugin {
    fn plan_update(settings: &BackendSettings, changes: TicketFields) -> UpdatePlan {
        let mut plan = UpdatePlan::new(DESCRIPTOR.label);

        if let Some(subject) = changes.subject {
            plan.set("subject", "summary", subject);
        }
        if let Some(description) = changes.description {
            plan.set("description", "description", description);
        }
        if let Some(status) = changes.status {
            match numeric(&status).or_else(|| settings.status_id(&status)) {
                Some(id) => plan.set("status", "statusId", id),
                None => plan.skip(
                    "status",
                    format!(
                        "Backlog cannot set status '{status}' by name; \
                         add it to status_ids in the backlog settings"
                    ),
                ),
            }
        }
        if let Some(priority) = changes.priority {
            let id = numeric(&priority)
                .or_else(|| settings.priority_id(&priority))
                .or_else(|| builtin_priority(&priority));
            match id {
                Some(id) => plan.set("priority", "priorityId", id),
                None => plan.skip("priority", format!("no Backlog priority named '{priority}'")),
            }
        }
        if let Some(assignee) = changes.assignee {
            match numeric(&assignee) {
                Some(id) => plan.set("assignee", "assigneeId", id),
                None => plan.skip(
                    "assignee",
                    format!("'{assignee}' is not a numeric Backlog user id"),
                ),
            }
        }
        if let Some(start_date) = changes.start_date {
            plan.set("start_date", "startDate", start_date.to_wire());
        }
        if let Some(due_date) = changes.due_date {
            plan.set("due_date", "dueDate", due_date.to_wire());
        }
        if changes.done_ratio.is_some() {
            plan.skip("done_ratio", "Backlog issues have no progress ratio");
        }
        if let Some(hours) = changes.estimated_hours {
            plan.set("estimated_hours", "estimatedHours", hours);
        }
        if let Some(hours) = changes.actual_hours {
            plan.set("actual_hours", "actualHours", hours);
        }
        if let Some(comment) = changes.comment {
            plan.set("comment", "comment", comment);
        }

        plan
    }
}

#[async_trait]
impl IssueTrackerPlugin for BacklogPlugin {
    fn descriptor(&self) -> &'static PluginDescriptor {
        &DESCRIPTOR
    }

    fn resolve_identifier(&self, raw: &str, settings: &BackendSettings) -> AppResult<TicketId> {
        identifier::resolve(raw, settings.base_url().unwrap_or_default(), ID_PATTERN)
    }

    async fn fetch(
        &self,
        settings: &BackendSettings,
        id: &TicketId,
        options: &FetchOptions,
    ) -> AppResult<LocalTicket> {
        let conn = Connection::open(settings)?;
        let client = HttpClient::new(settings.retry.fetch_policy())?;
        let issue = conn
            .read_issue(&client, id)
            .await
            .map_err(|err| err.for_issue(DESCRIPTOR.label, id))?;
        Ok(issue.to_local(ID_KEY, options.heading))
    }

    /// Statuses are project specific in Backlog, so the current issue is read
    /// first and only fields that differ are sent.
    async fn update(
        &self,
        settings: &BackendSettings,
        id: &TicketId,
        request: &UpdateRequest,
    ) -> AppResult<UpdateOutcome> {
        self.check_update(settings, id, request)?;
        let conn = Connection::open(settings)?;
        let reader = HttpClient::new(settings.retry.fetch_policy())?;

        let current = conn
            .read_issue(&reader, id)
            .await
            .map_err(|err| err.for_issue(DESCRIPTOR.label, id))?;
        let plan = Self::plan_update(settings, current.changes(&request.fields));

        let wire = Value::Object(plan.payload().clone());
        if !plan.has_writes() {
            return Ok(plan.finish(id, wire, request.dry_run));
        }
        if request.dry_run {
            plan.log_dry_run(id, &wire);
            return Ok(plan.finish(id, wire, true));
        }

        let writer = reader.with_policy(settings.retry.update_policy());
        writer
            .patch(
                &conn.issue_url(id)?,
                &HeaderMap::new(),
                &RequestBody::Form(plan.form_pairs()),
            )
            .await
            .map_err(|err| err.for_issue(DESCRIPTOR.label, id))?;

        Ok(plan.finish(id, wire, false))
    }

    fn validate(&self, settings: &BackendSettings) -> ValidationReport {
        let mut errors = settings.missing_settings();
        if matches!(settings.credentials(), Some(Credentials::Basic { .. })) {
            errors.push("Backlog only supports api_key authentication".to_string());
        }
        ValidationReport::from_errors(errors)
    }

    fn extract_identifier(&self, front_matter: &Metadata) -> Option<TicketId> {
        front_matter
            .get(ID_KEY)?
            .as_str()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(TicketId::new)
    }
}

fn numeric(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

fn builtin_priority(name: &str) -> Option<u64> {
    let name = name.trim();
    BUILTIN_PRIORITIES
        .iter()
        .find(|(builtin, _)| builtin.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}

#[derive(Deserialize)]
struct NamedRef {
    id: u64,
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BacklogIssue {
    issue_key: String,
    issue_type: Option<NamedRef>,
    #[serde(default)]
    summary: String,
    description: Option<String>,
    status: Option<NamedRef>,
    priority: Option<NamedRef>,
    assignee: Option<NamedRef>,
    created_user: Option<NamedRef>,
    start_date: Option<String>,
    due_date: Option<String>,
    estimated_hours: Option<f64>,
    actual_hours: Option<f64>,
    created: Option<String>,
    updated: Option<String>,
}

impl BacklogIssue {
    fn into_remote(self, url: String) -> RemoteIssue {
        let project = self
            .issue_key
            .rsplit_once('-')
            .map(|(project, _)| project.to_string());

        RemoteIssue {
            id: self.issue_key,
            url: Some(url),
            project,
            tracker: name_of(&self.issue_type),
            status_id: self.status.as_ref().map(|status| status.id),
            status: name_of(&self.status),
            priority_id: self.priority.as_ref().map(|priority| priority.id),
            priority: name_of(&self.priority),
            author: name_of(&self.created_user),
            assignee_id: self.assignee.as_ref().map(|user| user.id),
            assignee: name_of(&self.assignee),
            start_date: self.start_date.as_deref().and_then(parse_remote_date),
            due_date: self.due_date.as_deref().and_then(parse_remote_date),
            done_ratio: None,
            estimated_hours: self.estimated_hours,
            spent_hours: None,
            actual_hours: self.actual_hours,
            created: self.created,
            updated: self.updated,
            subject: self.summary,
            description: self.description,
        }
    }
}

fn name_of(reference: &Option<NamedRef>) -> Option<String> {
    reference.as_ref().and_then(|named| named.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BackendSettings {
        BackendSettings {
            base_url: Some("https://space.backlog.com".to_string()),
            api_key: Some("key".to_string()),
            ..BackendSettings::default()
        }
    }

    #[test]
    fn status_by_name_needs_a_table() {
        let changes = TicketFields {
            status: Some("Done".to_string()),
            priority: Some("High".to_string()),
            ..TicketFields::default()
        };

        let plan = BacklogPlugin::plan_update(&settings(), changes.clone());
        assert!(plan.payload().get("statusId").is_none());
        assert_eq!(plan.payload().get("priorityId"), Some(&Value::from(2)));

        let mut mapped = settings();
        mapped.status_ids.insert("done".to_string(), 4);
        let plan = BacklogPlugin::plan_update(&mapped, changes);
        assert_eq!(plan.payload().get("statusId"), Some(&Value::from(4)));
    }

    #[test]
    fn cleared_dates_are_sent_empty() {
        let changes = TicketFields {
            due_date: Some(crate::domain::fields::DateChange::Clear),
            ..TicketFields::default()
        };
        let plan = BacklogPlugin::plan_update(&settings(), changes);
        assert_eq!(
            plan.form_pairs(),
            vec![("dueDate".to_string(), String::new())]
        );
    }

    #[test]
    fn rejects_password_authentication() {
        let password_only = BackendSettings {
            api_key: None,
            username: Some("alice".to_string()),
            password: Some("pw".to_string()),
            ..settings()
        };
        let report = BacklogPlugin.validate(&password_only);
        assert!(!report.valid);
        assert!(report.errors[0].contains("api_key"));
    }

    #[test]
    fn extracts_key_from_front_matter() {
        let mut metadata = Metadata::new();
        assert_eq!(BacklogPlugin.extract_identifier(&metadata), None);
        metadata.insert("key".into(), "PROJ-12".into());
        assert_eq!(
            BacklogPlugin.extract_identifier(&metadata),
            Some(TicketId::new("PROJ-12"))
        );
    }

    #[test]
    fn decodes_issue_payload() {
        let payload = r#"{"id":1,"projectId":9,"issueKey":"PROJ-12","keyId":12,
            "issueType":{"id":3,"name":"Bug"},"summary":"Crash","description":"a\r\nb",
            "status":{"id":1,"name":"Open"},"priority":{"id":3,"name":"Normal"},
            "assignee":null,"startDate":null,"dueDate":"2024-03-05T00:00:00Z",
            "estimatedHours":null,"actualHours":2.0,"createdUser":{"id":8,"name":"Eve"}}"#;
        let issue: BacklogIssue = serde_json::from_str(payload).unwrap();
        let remote = issue.into_remote("https://space.backlog.com/view/PROJ-12".to_string());

        assert_eq!(remote.project.as_deref(), Some("PROJ"));
        assert_eq!(remote.tracker.as_deref(), Some("Bug"));
        assert_eq!(remote.author.as_deref(), Some("Eve"));
        assert_eq!(remote.due_date, chrono::NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(remote.assignee, None);

        let ticket = remote.to_local(ID_KEY, Default::default());
        assert_eq!(ticket.description(), "a\nb");
        assert!(ticket.metadata.get("assignee").is_none());
    }
}
