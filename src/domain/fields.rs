use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_yaml::Value;

use crate::domain::ticket::LocalTicket;
use crate::error::{AppError, AppResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub const OVERRIDE_KEYS: [&str; 11] = [
    "subject",
    "description",
    "status",
    "priority",
    "assignee",
    "start_date",
    "due_date",
    "done_ratio",
    "estimated_hours",
    "actual_hours",
    "comment",
];

/// A date field in an update: absent means "leave it alone".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum DateChange {
    Set(NaiveDate),
    Clear,
}

impl DateChange {
    pub fn parse(value: &str) -> AppResult<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(DateChange::Clear);
        }
        NaiveDate::parse_from_str(value, DATE_FORMAT)
            .map(DateChange::Set)
            .map_err(|_| AppError::Validation(format!("'{value}' is not a YYYY-MM-DD date")))
    }

    /// Wire form shared by both backends: an empty string clears the date.
    pub fn to_wire(self) -> String {
        match self {
            DateChange::Set(date) => date.format(DATE_FORMAT).to_string(),
            DateChange::Clear => String::new(),
        }
    }
}

impl TryFrom<String> for DateChange {
    type Error = AppError;

    fn try_from(value: String) -> AppResult<Self> {
        DateChange::parse(&value)
    }
}

/// Partial set of writable ticket fields. Used for each precedence tier and
/// for the merged request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TicketFields {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub start_date: Option<DateChange>,
    pub due_date: Option<DateChange>,
    pub done_ratio: Option<u8>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub comment: Option<String>,
}

impl TicketFields {
    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let present = [
            self.subject.is_some(),
            self.description.is_some(),
            self.status.is_some(),
            self.priority.is_some(),
            self.assignee.is_some(),
            self.start_date.is_some(),
            self.due_date.is_some(),
            self.done_ratio.is_some(),
            self.estimated_hours.is_some(),
            self.actual_hours.is_some(),
            self.comment.is_some(),
        ];
        OVERRIDE_KEYS
            .iter()
            .zip(present)
            .filter_map(|(name, set)| set.then_some(*name))
            .collect()
    }

    /// Parses caller overrides. Keys may use `-` or `_`; only date fields
    /// accept an empty value, which clears them.
    pub fn from_overrides(overrides: &BTreeMap<String, String>) -> AppResult<Self> {
        let mut fields = TicketFields::default();

        for (raw_key, raw_value) in overrides {
            let key = raw_key.trim().replace('-', "_");
            let value = raw_value.trim();

            if value.is_empty() && key != "start_date" && key != "due_date" {
                return Err(AppError::Validation(format!(
                    "'{raw_key}' cannot be empty; only start_date and due_date can be cleared"
                )));
            }

            match key.as_str() {
                "subject" => fields.subject = Some(value.to_string()),
                "description" => fields.description = Some(value.to_string()),
                "status" => fields.status = Some(value.to_string()),
                "priority" => fields.priority = Some(value.to_string()),
                "assignee" => fields.assignee = Some(value.to_string()),
                "comment" => fields.comment = Some(value.to_string()),
                "start_date" => fields.start_date = Some(DateChange::parse(value)?),
                "due_date" => fields.due_date = Some(DateChange::parse(value)?),
                "done_ratio" => fields.done_ratio = Some(parse_ratio(value)?),
                "estimated_hours" => fields.estimated_hours = Some(parse_hours(raw_key, value)?),
                "actual_hours" => fields.actual_hours = Some(parse_hours(raw_key, value)?),
                _ => {
                    return Err(AppError::Validation(format!(
                        "unknown field '{raw_key}'; expected one of: {}",
                        OVERRIDE_KEYS.join(", ")
                    )));
                }
            }
        }

        Ok(fields)
    }

    /// Reads the writable fields out of a local ticket. The title heading
    /// proposes the subject, the rest of the body the description. Blank
    /// front matter values are treated as absent.
    pub fn from_local(ticket: &LocalTicket) -> AppResult<Self> {
        let description = ticket.description();
        let description = description.trim_end();

        Ok(TicketFields {
            subject: ticket.title.clone(),
            description: (!description.is_empty()).then(|| description.to_string()),
            status: ticket.metadata_str("status"),
            priority: ticket.metadata_str("priority"),
            assignee: ticket.metadata_str("assignee"),
            start_date: front_matter_date(ticket, "start_date")?,
            due_date: front_matter_date(ticket, "due_date")?,
            done_ratio: front_matter_number(ticket, "done_ratio")?
                .map(|value| parse_ratio(&value.to_string()))
                .transpose()?,
            estimated_hours: front_matter_number(ticket, "estimated_hours")?,
            actual_hours: front_matter_number(ticket, "actual_hours")?,
            comment: None,
        })
    }
}

/// Field-by-field merge: explicit overrides win over file values, which win
/// over backend defaults.
pub fn merge(explicit: TicketFields, file: TicketFields, defaults: TicketFields) -> TicketFields {
    TicketFields {
        subject: explicit.subject.or(file.subject).or(defaults.subject),
        description: explicit.description.or(file.description).or(defaults.description),
        status: explicit.status.or(file.status).or(defaults.status),
        priority: explicit.priority.or(file.priority).or(defaults.priority),
        assignee: explicit.assignee.or(file.assignee).or(defaults.assignee),
        start_date: explicit.start_date.or(file.start_date).or(defaults.start_date),
        due_date: explicit.due_date.or(file.due_date).or(defaults.due_date),
        done_ratio: explicit.done_ratio.or(file.done_ratio).or(defaults.done_ratio),
        estimated_hours: explicit
            .estimated_hours
            .or(file.estimated_hours)
            .or(defaults.estimated_hours),
        actual_hours: explicit
            .actual_hours
            .or(file.actual_hours)
            .or(defaults.actual_hours),
        comment: explicit.comment.or(file.comment).or(defaults.comment),
    }
}

fn parse_ratio(value: &str) -> AppResult<u8> {
    value
        .parse::<u8>()
        .ok()
        .filter(|ratio| *ratio <= 100)
        .ok_or_else(|| {
            AppError::Validation(format!("done_ratio must be between 0 and 100, got '{value}'"))
        })
}

fn parse_hours(key: &str, value: &str) -> AppResult<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|hours| hours.is_finite() && *hours >= 0.0)
        .ok_or_else(|| {
            AppError::Validation(format!("{key} must be a non-negative number, got '{value}'"))
        })
}

fn front_matter_date(ticket: &LocalTicket, key: &str) -> AppResult<Option<DateChange>> {
    match ticket.metadata_str(key) {
        Some(value) => DateChange::parse(&value)
            .map(Some)
            .map_err(|err| AppError::Validation(format!("front matter '{key}': {err}"))),
        None => Ok(None),
    }
}

fn front_matter_number(ticket: &LocalTicket, key: &str) -> AppResult<Option<f64>> {
    match ticket.metadata.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => Ok(number.as_f64()),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => text.trim().parse::<f64>().map(Some).map_err(|_| {
            AppError::Validation(format!("front matter '{key}' must be a number, got '{text}'"))
        }),
        Some(other) => Err(AppError::Validation(format!(
            "front matter '{key}' must be a number, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::heading::HeadingStyle;
    use crate::domain::ticket::Metadata;

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn explicit_override_beats_front_matter() {
        let explicit = TicketFields {
            status: Some("Closed".to_string()),
            ..TicketFields::default()
        };
        let file = TicketFields {
            status: Some("Open".to_string()),
            priority: Some("High".to_string()),
            ..TicketFields::default()
        };
        let defaults = TicketFields {
            priority: Some("Normal".to_string()),
            assignee: Some("7".to_string()),
            ..TicketFields::default()
        };

        let merged = merge(explicit, file, defaults);
        assert_eq!(merged.status.as_deref(), Some("Closed"));
        assert_eq!(merged.priority.as_deref(), Some("High"));
        assert_eq!(merged.assignee.as_deref(), Some("7"));
        assert_eq!(merged.due_date, None);
        assert_eq!(merged.names(), vec!["status", "priority", "assignee"]);
    }

    #[test]
    fn empty_override_clears_dates_only() {
        let fields =
            TicketFields::from_overrides(&overrides(&[("due-date", ""), ("start_date", "2024-03-01")]))
                .unwrap();
        assert_eq!(fields.due_date, Some(DateChange::Clear));
        assert_eq!(
            fields.start_date,
            Some(DateChange::Set(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
        );

        let err = TicketFields::from_overrides(&overrides(&[("status", "")])).unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(TicketFields::from_overrides(&overrides(&[("colour", "red")])).is_err());
        assert!(TicketFields::from_overrides(&overrides(&[("done_ratio", "120")])).is_err());
        assert!(TicketFields::from_overrides(&overrides(&[("estimated_hours", "-1")])).is_err());
        assert!(TicketFields::from_overrides(&overrides(&[("due_date", "31/01/2024")])).is_err());
    }

    #[test]
    fn reads_fields_from_local_ticket() {
        let mut metadata = Metadata::new();
        metadata.insert("id".into(), 42.into());
        metadata.insert("status".into(), "In Progress".into());
        metadata.insert("due_date".into(), "2024-05-01".into());
        metadata.insert("start_date".into(), Value::Null);
        metadata.insert("estimated_hours".into(), 3.into());
        metadata.insert("done_ratio".into(), 40.into());
        let ticket = LocalTicket::from_remote(
            metadata,
            "Ship it",
            "Details here.\n",
            HeadingStyle::Atx,
        );

        let fields = TicketFields::from_local(&ticket).unwrap();
        assert_eq!(fields.subject.as_deref(), Some("Ship it"));
        assert_eq!(fields.description.as_deref(), Some("Details here."));
        assert_eq!(fields.status.as_deref(), Some("In Progress"));
        assert_eq!(fields.start_date, None);
        assert_eq!(fields.estimated_hours, Some(3.0));
        assert_eq!(fields.done_ratio, Some(40));
        assert_eq!(fields.comment, None);
    }

    #[test]
    fn body_without_heading_proposes_no_subject() {
        let ticket = LocalTicket::from_body(Metadata::new(), "Only a description");
        let fields = TicketFields::from_local(&ticket).unwrap();
        assert_eq!(fields.subject, None);
        assert_eq!(fields.description.as_deref(), Some("Only a description"));
    }

    #[test]
    fn defaults_deserialize_from_yaml() {
        let fields: TicketFields =
            serde_yaml::from_str("priority: Normal\ndue_date: \"2024-12-24\"\n").unwrap();
        assert_eq!(fields.priority.as_deref(), Some("Normal"));
        assert!(matches!(fields.due_date, Some(DateChange::Set(_))));
    }
}
