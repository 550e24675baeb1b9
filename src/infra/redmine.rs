use async_trait::async_trait;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use chrono::NaiveDate;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::json;

use crate::config::{BackendSettings, Credentials};
use crate::domain::fields::TicketFields;
use crate::domain::identifier::{self, IdPattern, TicketId};
use crate::domain::issue::RemoteIssue;
use crate::domain::ticket::{LocalTicket, Metadata};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::infra::http::{HttpClient, RequestBody};
use crate::services::{
    FetchOptions, IssueTrackerPlugin, PluginDescriptor, UpdateOutcome, UpdatePlan, UpdateRequest,
    ValidationReport,
};

pub static DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "redmine",
    label: "Redmine",
    file_prefix: "redmine-",
};

const ID_PATTERN: IdPattern = IdPattern::NumericAfter("issues");
const ID_KEY: &str = "id";
const API_KEY_HEADER: &str = "x-redmine-api-key";

pub struct RedminePlugin;

struct Connection {
    base_url: String,
    headers: HeaderMap,
}

impl Connection {
    fn open(settings: &BackendSettings) -> AppResult<Self> {
        RedminePlugin
            .validate(settings)
            .into_result(DESCRIPTOR.label)?;
        let (Some(base_url), Some(credentials)) = (settings.base_url(), settings.credentials())
        else {
            return Err(AppError::Validation(
                "Redmine base_url and credentials are required".to_string(),
            ));
        };

        let mut headers = HeaderMap::new();
        match credentials {
            Credentials::ApiKey(key) => {
                headers.insert(HeaderName::from_static(API_KEY_HEADER), header_value(key)?);
            }
            Credentials::Basic { username, password } => {
                headers.insert(AUTHORIZATION, header_value(&auth_header(username, password))?);
            }
        }

        Ok(Self {
            base_url: base_url.to_string(),
            headers,
        })
    }

    fn issue_url(&self, id: &TicketId) -> String {
        format!("{}/issues/{}.json", self.base_url, id)
    }

    fn browse_url(&self, id: &TicketId) -> String {
        format!("{}/issues/{}", self.base_url, id)
    }

    async fn read_issue(&self, client: &HttpClient, id: &TicketId) -> AppResult<RemoteIssue> {
        let envelope: IssueEnvelope = client
            .get(&self.issue_url(id), &self.headers)
            .await?
            .into_json("Redmine issue")?;
        Ok(envelope.issue.into_remote(self.browse_url(id)))
    }

    async fn lookup_id(
        &self,
        client: &HttpClient,
        path: &str,
        list_key: &str,
        name: &str,
    ) -> AppResult<Option<u64>> {
        let url = format!("{}/{path}", self.base_url);
        let value: serde_json::Value = client
            .get(&url, &self.headers)
            .await?
            .into_json("Redmine lookup table")?;
        let entries: Vec<NamedRef> = serde_json::from_value(
            value.get(list_key).cloned().unwrap_or_default(),
        )
        .map_err(|err| AppError::unexpected(format!("decoding Redmine {list_key}"), err))?;

        Ok(entries
            .into_iter()
            .find(|entry| {
                entry
                    .name
                    .as_deref()
                    .is_some_and(|entry_name| entry_name.eq_ignore_ascii_case(name.trim()))
            })
            .map(|entry| entry.id))
    }

    /// Numeric values pass through; names go through the configured table and
    /// then the remote enumeration.
    async fn resolve_named_id(
        &self,
        client: &HttpClient,
        value: &str,
        configured: Option<u64>,
        path: &str,
        list_key: &str,
    ) -> AppResult<Option<u64>> {
        if let Ok(id) = value.trim().parse::<u64>() {
            return Ok(Some(id));
        }
        if configured.is_some() {
            return Ok(configured);
        }
        self.lookup_id(client, path, list_key, value).await
    }
}

impl RedminePlugin {
    async fn plan_update(
        conn: &Connection,
        client: &HttpClient,
        settings: &BackendSettings,
        changes: TicketFields,
    ) -> AppResult<UpdatePlan> {
        let mut plan = UpdatePlan::new(DESCRIPTOR.label);

        if let Some(subject) = changes.subject {
            plan.set("subject", "subject", subject);
        }
        if let Some(description) = changes.description {
            plan.set("description", "description", description);
        }
        if let Some(status) = changes.status {
            let id = conn
                .resolve_named_id(
                    client,
                    &status,
                    settings.status_id(&status),
                    "issue_statuses.json",
                    "issue_statuses",
                )
                .await;
            match lookup_outcome(id)? {
                Ok(Some(id)) => plan.set("status", "status_id", id),
                Ok(None) => plan.skip("status", format!("no Redmine status named '{status}'")),
                Err(reason) => plan.skip("status", reason),
            }
        }
        if let Some(priority) = changes.priority {
            let id = conn
                .resolve_named_id(
                    client,
                    &priority,
                    settings.priority_id(&priority),
                    "enumerations/issue_priorities.json",
                    "issue_priorities",
                )
                .await;
            match lookup_outcome(id)? {
                Ok(Some(id)) => plan.set("priority", "priority_id", id),
                Ok(None) => {
                    plan.skip("priority", format!("no Redmine priority named '{priority}'"))
                }
                Err(reason) => plan.skip("priority", reason),
            }
        }
        if let Some(assignee) = changes.assignee {
            match assignee.trim().parse::<u64>() {
                Ok(id) => plan.set("assignee", "assigned_to_id", id),
                Err(_) => plan.skip(
                    "assignee",
                    format!("'{assignee}' is not a numeric Redmine user id"),
                ),
            }
        }
        if let Some(start_date) = changes.start_date {
            plan.set("start_date", "start_date", start_date.to_wire());
        }
        if let Some(due_date) = changes.due_date {
            plan.set("due_date", "due_date", due_date.to_wire());
        }
        if let Some(done_ratio) = changes.done_ratio {
            plan.set("done_ratio", "done_ratio", done_ratio);
        }
        if let Some(hours) = changes.estimated_hours {
            plan.set("estimated_hours", "estimated_hours", hours);
        }
        if changes.actual_hours.is_some() {
            plan.skip(
                "actual_hours",
                "Redmine records spent time as time entries, not on the issue",
            );
        }
        if let Some(comment) = changes.comment {
            plan.set("comment", "notes", comment);
        }

        Ok(plan)
    }
}

#[async_trait]
impl IssueTrackerPlugin for RedminePlugin {
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
        let changes = current.changes(&request.fields);
        let plan = Self::plan_update(&conn, &reader, settings, changes)
            .await
            .map_err(|err| err.for_issue(DESCRIPTOR.label, id))?;

        let wire = json!({ "issue": plan.payload() });
        if !plan.has_writes() {
            return Ok(plan.finish(id, wire, request.dry_run));
        }
        if request.dry_run {
            plan.log_dry_run(id, &wire);
            return Ok(plan.finish(id, wire, true));
        }

        let writer = reader.with_policy(settings.retry.update_policy());
        writer
            .put(
                &conn.issue_url(id),
                &conn.headers,
                &RequestBody::Json(wire.clone()),
            )
            .await
            .map_err(|err| err.for_issue(DESCRIPTOR.label, id))?;

        Ok(plan.finish(id, wire, false))
    }

    fn validate(&self, settings: &BackendSettings) -> ValidationReport {
        ValidationReport::from_errors(settings.missing_settings())
    }

    fn extract_identifier(&self, front_matter: &Metadata) -> Option<TicketId> {
        match front_matter.get(ID_KEY)? {
            serde_yaml::Value::Number(number) => {
                number.as_u64().map(|id| TicketId::new(id.to_string()))
            }
            serde_yaml::Value::String(text) => {
                let text = text.trim().trim_start_matches('#');
                (!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))
                    .then(|| TicketId::new(text))
            }
            _ => None,
        }
    }
}

/// A failed name lookup only costs the field it was for, unless the
/// credentials themselves were refused.
fn lookup_outcome(result: AppResult<Option<u64>>) -> AppResult<Result<Option<u64>, String>> {
    match result {
        Ok(id) => Ok(Ok(id)),
        Err(err) if err.kind() == ErrorKind::Authentication => Err(err),
        Err(err) => Ok(Err(format!("name lookup failed: {err}"))),
    }
}

fn auth_header(username: &str, password: &str) -> String {
    let credentials = format!("{username}:{password}");
    let encoded = BASE64_STANDARD.encode(credentials);
    format!("Basic {encoded}")
}

fn header_value(value: &str) -> AppResult<HeaderValue> {
    let mut header = HeaderValue::from_str(value).map_err(|_| {
        AppError::Validation(
            "Redmine credentials contain characters not allowed in headers".to_string(),
        )
    })?;
    header.set_sensitive(true);
    Ok(header)
}

#[derive(Deserialize)]
struct IssueEnvelope {
    issue: RedmineIssue,
}

#[derive(Deserialize)]
struct NamedRef {
    id: u64,
    name: Option<String>,
}

#[derive(Deserialize)]
struct RedmineIssue {
    id: u64,
    project: Option<NamedRef>,
    tracker: Option<NamedRef>,
    status: Option<NamedRef>,
    priority: Option<NamedRef>,
    author: Option<NamedRef>,
    assigned_to: Option<NamedRef>,
    #[serde(default)]
    subject: String,
    description: Option<String>,
    start_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    done_ratio: Option<u8>,
    estimated_hours: Option<f64>,
    spent_hours: Option<f64>,
    created_on: Option<String>,
    updated_on: Option<String>,
}

impl RedmineIssue {
    fn into_remote(self, url: String) -> RemoteIssue {
        RemoteIssue {
            id: self.id.to_string(),
            url: Some(url),
            project: name_of(&self.project),
            tracker: name_of(&self.tracker),
            status_id: self.status.as_ref().map(|status| status.id),
            status: name_of(&self.status),
            priority_id: self.priority.as_ref().map(|priority| priority.id),
            priority: name_of(&self.priority),
            author: name_of(&self.author),
            assignee_id: self.assigned_to.as_ref().map(|user| user.id),
            assignee: name_of(&self.assigned_to),
            start_date: self.start_date,
            due_date: self.due_date,
            done_ratio: self.done_ratio,
            estimated_hours: self.estimated_hours,
            spent_hours: self.spent_hours,
            actual_hours: None,
            created: self.created_on,
            updated: self.updated_on,
            subject: self.subject,
            description: self.description,
        }
    }
}

fn name_of(reference: &Option<NamedRef>) -> Option<String> {
    reference.as_ref().and_then(|named| named.name.clone())
}
