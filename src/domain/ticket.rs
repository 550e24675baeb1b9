use serde_yaml::{Mapping, Value};

use crate::domain::heading::{self, HeadingStyle};
use crate::error::{AppError, AppResult};

pub type Metadata = Mapping;

const FRONT_MATTER_DELIMITER: &str = "---";

/// A ticket as it lives on disk: front matter plus a Markdown body whose
/// first heading is the title. The title never appears in the metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTicket {
    pub metadata: Metadata,
    pub title: Option<String>,
    pub body: String,
}

impl LocalTicket {
    pub fn from_remote(
        metadata: Metadata,
        title: &str,
        description: &str,
        style: HeadingStyle,
    ) -> Self {
        let description = normalize_line_endings(description);
        let body = heading::render(title, &description, style);
        let title = title.trim();
        Self {
            metadata,
            title: (!title.is_empty()).then(|| title.to_string()),
            body,
        }
    }

    pub fn from_body(metadata: Metadata, body: &str) -> Self {
        let body = normalize_line_endings(body);
        let (title, _) = heading::split(&body);
        Self {
            metadata,
            title,
            body,
        }
    }

    /// Body text after the title heading.
    pub fn description(&self) -> String {
        heading::split(&self.body).1
    }

    pub fn metadata_str(&self, key: &str) -> Option<String> {
        let text = match self.metadata.get(key)? {
            Value::String(text) => text.trim().to_string(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    pub fn parse_document(text: &str) -> AppResult<Self> {
        let text = normalize_line_endings(text);
        let Some((yaml, body)) = split_front_matter(&text) else {
            return Ok(Self::from_body(Metadata::new(), text.trim_start_matches('\n')));
        };

        let metadata = if yaml.trim().is_empty() {
            Metadata::new()
        } else {
            match serde_yaml::from_str::<Value>(yaml) {
                Ok(Value::Mapping(mapping)) => mapping,
                Ok(Value::Null) => Metadata::new(),
                Ok(_) => {
                    return Err(AppError::Validation(
                        "front matter must be a mapping of keys to values".to_string(),
                    ));
                }
                Err(err) => {
                    return Err(AppError::Validation(format!("invalid front matter: {err}")));
                }
            }
        };

        Ok(Self::from_body(metadata, body.trim_start_matches('\n')))
    }

    pub fn to_document(&self) -> AppResult<String> {
        let yaml = if self.metadata.is_empty() {
            String::new()
        } else {
            serde_yaml::to_string(&self.metadata)
                .map_err(|err| AppError::unexpected("serializing front matter", err))?
        };

        let mut document = format!("{FRONT_MATTER_DELIMITER}\n{yaml}{FRONT_MATTER_DELIMITER}\n");
        if !self.body.is_empty() {
            document.push('\n');
            document.push_str(&self.body);
            if !self.body.ends_with('\n') {
                document.push('\n');
            }
        }
        Ok(document)
    }
}

pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Returns the YAML between the opening and closing `---` lines and the
/// text after the closing line.
fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| (text == FRONT_MATTER_DELIMITER).then_some(""))?;

    if let Some(body) = rest.strip_prefix("---\n") {
        return Some(("", body));
    }
    if rest == FRONT_MATTER_DELIMITER {
        return Some(("", ""));
    }

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let end = offset + line.len();
        if offset > 0 && line.trim_end() == FRONT_MATTER_DELIMITER {
            return Some((&rest[..offset], &rest[end..]));
        }
        offset = end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_front_matter_and_title() {
        let text = "---\r\nid: 12\r\nstatus: New\r\n---\r\n\r\n# Broken export\r\n\r\nSteps:\r\n1. click\r\n";
        let ticket = LocalTicket::parse_document(text).unwrap();

        assert_eq!(ticket.metadata_str("id").as_deref(), Some("12"));
        assert_eq!(ticket.metadata_str("status").as_deref(), Some("New"));
        assert_eq!(ticket.title.as_deref(), Some("Broken export"));
        assert_eq!(ticket.description(), "Steps:\n1. click\n");
        assert!(!ticket.body.contains('\r'));
    }

    #[test]
    fn document_round_trips() {
        let mut metadata = Metadata::new();
        metadata.insert("key".into(), "PROJ-3".into());
        metadata.insert("priority".into(), "High".into());
        let ticket = LocalTicket::from_remote(metadata, "Title", "Body\n", HeadingStyle::Setext);

        let document = ticket.to_document().unwrap();
        assert!(document.starts_with("---\nkey: PROJ-3\npriority: High\n---\n\nTitle\n"));

        let parsed = LocalTicket::parse_document(&document).unwrap();
        assert_eq!(parsed, ticket);
    }

    #[test]
    fn document_without_front_matter_is_all_body() {
        let ticket = LocalTicket::parse_document("# Title\n\ntext\n").unwrap();
        assert!(ticket.metadata.is_empty());
        assert_eq!(ticket.title.as_deref(), Some("Title"));
    }

    #[test]
    fn rejects_non_mapping_front_matter() {
        let err = LocalTicket::parse_document("---\n- a\n- b\n---\nbody").unwrap_err();
        assert!(err.to_string().contains("mapping"));
    }

    #[test]
    fn empty_front_matter_is_allowed() {
        let ticket = LocalTicket::parse_document("---\n---\n\nbody\n").unwrap();
        assert!(ticket.metadata.is_empty());
        assert_eq!(ticket.body, "body\n");
    }

    #[test]
    fn title_is_never_written_to_metadata() {
        let ticket = LocalTicket::from_remote(Metadata::new(), "Title", "", HeadingStyle::Atx);
        assert!(ticket.metadata.get("title").is_none());
        assert_eq!(ticket.body, "# Title\n");
    }
}
