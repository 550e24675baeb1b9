use chrono::NaiveDate;
use serde_yaml::Value;

use crate::domain::fields::{DATE_FORMAT, DateChange, TicketFields};
use crate::domain::heading::HeadingStyle;
use crate::domain::ticket::{LocalTicket, Metadata, normalize_line_endings};

const HOURS_EPSILON: f64 = 0.001;

/// Backend-neutral view of one remote issue, built fresh for every call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteIssue {
    pub id: String,
    pub url: Option<String>,
    pub project: Option<String>,
    pub tracker: Option<String>,
    pub status: Option<String>,
    pub status_id: Option<u64>,
    pub priority: Option<String>,
    pub priority_id: Option<u64>,
    pub author: Option<String>,
    pub assignee: Option<String>,
    pub assignee_id: Option<u64>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub done_ratio: Option<u8>,
    pub estimated_hours: Option<f64>,
    pub spent_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub subject: String,
    pub description: Option<String>,
}

impl RemoteIssue {
    /// Front matter keeps only the values the remote actually has;
    /// `id_key` names the field the backend reads its identifier from.
    pub fn to_local(&self, id_key: &str, style: HeadingStyle) -> LocalTicket {
        let mut metadata = Metadata::new();
        put(&mut metadata, id_key, Some(identifier_value(&self.id)));
        put_str(&mut metadata, "project", &self.project);
        put_str(&mut metadata, "tracker", &self.tracker);
        put_str(&mut metadata, "status", &self.status);
        put_str(&mut metadata, "priority", &self.priority);
        put_str(&mut metadata, "author", &self.author);
        put_str(&mut metadata, "assignee", &self.assignee);
        put(&mut metadata, "start_date", self.start_date.map(date_value));
        put(&mut metadata, "due_date", self.due_date.map(date_value));
        put(&mut metadata, "done_ratio", self.done_ratio.map(Value::from));
        put(&mut metadata, "estimated_hours", self.estimated_hours.map(Value::from));
        put(&mut metadata, "spent_hours", self.spent_hours.map(Value::from));
        put(&mut metadata, "actual_hours", self.actual_hours.map(Value::from));
        put_str(&mut metadata, "created", &self.created);
        put_str(&mut metadata, "updated", &self.updated);
        put_str(&mut metadata, "url", &self.url);

        let description = self.description.as_deref().unwrap_or_default();
        LocalTicket::from_remote(metadata, &self.subject, description, style)
    }

    /// Keeps only the requested fields whose value differs from this issue.
    /// A comment is always kept since it never matches existing state.
    pub fn changes(&self, desired: &TicketFields) -> TicketFields {
        TicketFields {
            subject: desired
                .subject
                .clone()
                .filter(|subject| subject.trim() != self.subject.trim()),
            description: desired.description.clone().filter(|description| {
                let current = normalize_line_endings(self.description.as_deref().unwrap_or_default());
                normalize_line_endings(description).trim_end() != current.trim_end()
            }),
            status: desired
                .status
                .clone()
                .filter(|status| !same_named(status, &self.status, self.status_id)),
            priority: desired
                .priority
                .clone()
                .filter(|priority| !same_named(priority, &self.priority, self.priority_id)),
            assignee: desired
                .assignee
                .clone()
                .filter(|assignee| !same_named(assignee, &self.assignee, self.assignee_id)),
            start_date: desired
                .start_date
                .filter(|change| date_changes(*change, self.start_date)),
            due_date: desired
                .due_date
                .filter(|change| date_changes(*change, self.due_date)),
            done_ratio: desired
                .done_ratio
                .filter(|ratio| Some(*ratio) != self.done_ratio),
            estimated_hours: desired
                .estimated_hours
                .filter(|hours| !same_hours(*hours, self.estimated_hours)),
            actual_hours: desired
                .actual_hours
                .filter(|hours| !same_hours(*hours, self.actual_hours)),
            comment: desired.comment.clone(),
        }
    }
}

/// Parses the date part of either `2024-01-31` or `2024-01-31T00:00:00Z`.
pub fn parse_remote_date(value: &str) -> Option<NaiveDate> {
    let date = value.get(..10)?;
    NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
}

fn same_named(wanted: &str, current_name: &Option<String>, current_id: Option<u64>) -> bool {
    let wanted = wanted.trim();
    if let (Ok(id), Some(current_id)) = (wanted.parse::<u64>(), current_id) {
        return id == current_id;
    }
    current_name
        .as_deref()
        .is_some_and(|name| name.trim().eq_ignore_ascii_case(wanted))
}

fn date_changes(change: DateChange, current: Option<NaiveDate>) -> bool {
    match change {
        DateChange::Set(date) => current != Some(date),
        DateChange::Clear => current.is_some(),
    }
}

fn same_hours(wanted: f64, current: Option<f64>) -> bool {
    current.is_some_and(|current| (current - wanted).abs() < HOURS_EPSILON)
}

fn identifier_value(id: &str) -> Value {
    id.parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(id))
}

fn date_value(date: NaiveDate) -> Value {
    Value::from(date.format(DATE_FORMAT).to_string())
}

fn put(metadata: &mut Metadata, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        metadata.insert(Value::from(key), value);
    }
}

fn put_str(metadata: &mut Metadata, key: &str, value: &Option<String>) {
    let value = value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(Value::from);
    put(metadata, key, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> RemoteIssue {
        RemoteIssue {
            id: "1234".to_string(),
            project: Some("Website".to_string()),
            status: Some("New".to_string()),
            status_id: Some(1),
            priority: Some("Normal".to_string()),
            priority_id: Some(2),
            assignee: None,
            due_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            estimated_hours: Some(2.5),
            subject: "Broken export".to_string(),
            description: Some("Steps\r\nto reproduce".to_string()),
            ..RemoteIssue::default()
        }
    }

    #[test]
    fn absent_remote_values_are_omitted() {
        let ticket = issue().to_local("id", HeadingStyle::Atx);
        let keys: Vec<&str> = ticket
            .metadata
            .keys()
            .filter_map(Value::as_str)
            .collect();

        assert_eq!(
            keys,
            vec!["id", "project", "status", "priority", "due_date", "estimated_hours"]
        );
        assert!(ticket.metadata.values().all(|value| !value.is_null()));
        assert_eq!(ticket.metadata.get("id"), Some(&Value::from(1234u64)));
        assert_eq!(ticket.body, "# Broken export\n\nSteps\nto reproduce");
        assert_eq!(ticket.title.as_deref(), Some("Broken export"));
    }

    #[test]
    fn project_keys_stay_strings() {
        let remote = RemoteIssue {
            id: "PROJ-7".to_string(),
            subject: "x".to_string(),
            ..RemoteIssue::default()
        };
        let ticket = remote.to_local("key", HeadingStyle::Atx);
        assert_eq!(ticket.metadata_str("key").as_deref(), Some("PROJ-7"));
    }

    #[test]
    fn changes_drop_values_that_already_match() {
        let desired = TicketFields {
            subject: Some("Broken export".to_string()),
            description: Some("Steps\nto reproduce\n".to_string()),
            status: Some("new".to_string()),
            priority: Some("3".to_string()),
            due_date: Some(DateChange::Clear),
            estimated_hours: Some(2.5),
            comment: Some("done".to_string()),
            ..TicketFields::default()
        };

        let changes = issue().changes(&desired);
        assert_eq!(changes.names(), vec!["priority", "due_date", "comment"]);
    }

    #[test]
    fn unedited_fetched_file_has_no_changes() {
        for style in [HeadingStyle::Atx, HeadingStyle::Setext] {
            let remote = RemoteIssue {
                subject: "Crash on page #".to_string(),
                description: Some("\r\nSteps\r\n\r\nto reproduce".to_string()),
                ..issue()
            };
            let document = remote.to_local("id", style).to_document().unwrap();
            let reread = LocalTicket::parse_document(&document).unwrap();

            let desired = TicketFields::from_local(&reread).unwrap();
            assert!(remote.changes(&desired).is_empty(), "{style:?}: {document:?}");
        }
    }

    #[test]
    fn clearing_an_empty_date_is_not_a_change() {
        let desired = TicketFields {
            start_date: Some(DateChange::Clear),
            ..TicketFields::default()
        };
        assert!(issue().changes(&desired).is_empty());
    }

    #[test]
    fn parses_both_remote_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31);
        assert_eq!(parse_remote_date("2024-01-31"), expected);
        assert_eq!(parse_remote_date("2024-01-31T00:00:00Z"), expected);
        assert_eq!(parse_remote_date("soon"), None);
    }
}
