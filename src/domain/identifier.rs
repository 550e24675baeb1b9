use std::fmt;

use url::Url;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TicketId(String);

impl TicketId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a backend keeps the issue identifier inside its browser URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPattern {
    /// `.../issues/1234`, optionally with a `.json` suffix.
    NumericAfter(&'static str),
    /// `.../view/PROJ-123`.
    ProjectKeyAfter(&'static str),
}

impl IdPattern {
    fn describe(&self) -> String {
        match self {
            IdPattern::NumericAfter(segment) => format!("/{segment}/<number>"),
            IdPattern::ProjectKeyAfter(segment) => format!("/{segment}/<PROJECT>-<number>"),
        }
    }

    fn extract(&self, url: &Url) -> Option<String> {
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        let (marker, accept) = match *self {
            IdPattern::NumericAfter(marker) => (marker, is_numeric_id as fn(&str) -> bool),
            IdPattern::ProjectKeyAfter(marker) => (marker, is_project_key as fn(&str) -> bool),
        };

        segments.windows(2).find_map(|pair| {
            if pair[0] != marker {
                return None;
            }
            let candidate = pair[1].strip_suffix(".json").unwrap_or(pair[1]);
            accept(candidate).then(|| candidate.to_string())
        })
    }
}

/// Turns user input into a backend identifier. Anything that is not an
/// http(s) URL is taken to already be an identifier.
pub fn resolve(raw: &str, base_url: &str, pattern: IdPattern) -> AppResult<TicketId> {
    let Some(url) = parse_http_url(raw) else {
        return Ok(TicketId::new(raw));
    };

    let base = Url::parse(base_url).map_err(|err| {
        AppError::Validation(format!("configured base URL '{base_url}' is invalid: {err}"))
    })?;

    if !same_origin(&url, &base) {
        return Err(AppError::Validation(format!(
            "URL '{raw}' does not belong to the configured tracker '{base_url}'"
        )));
    }

    pattern.extract(&url).map(TicketId::new).ok_or_else(|| {
        AppError::Validation(format!(
            "could not find a ticket identifier in '{raw}'; expected a path like {}",
            pattern.describe()
        ))
    })
}

/// Schemes are case-insensitive; `Url` lowercases them while parsing.
fn parse_http_url(raw: &str) -> Option<Url> {
    Url::parse(raw.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

fn same_origin(left: &Url, right: &Url) -> bool {
    left.scheme() == right.scheme()
        && left.host_str().map(str::to_ascii_lowercase)
            == right.host_str().map(str::to_ascii_lowercase)
        && left.port_or_known_default() == right.port_or_known_default()
}

fn is_numeric_id(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

fn is_project_key(value: &str) -> bool {
    let Some((project, number)) = value.rsplit_once('-') else {
        return false;
    };
    let mut chars = project.chars();
    let starts_upper = chars.next().is_some_and(|c| c.is_ascii_uppercase());
    starts_upper
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && is_numeric_id(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const REDMINE: IdPattern = IdPattern::NumericAfter("issues");
    const BACKLOG: IdPattern = IdPattern::ProjectKeyAfter("view");

    #[test]
    fn non_url_input_is_returned_unchanged() {
        for raw in ["1234", "PROJ-9", "#12", " spaced ", "ftp://x/issues/1"] {
            let id = resolve(raw, "https://t.example.com", REDMINE).unwrap();
            assert_eq!(id.as_str(), raw);
        }
    }

    #[test]
    fn extracts_numeric_id_from_matching_url() {
        let id = resolve(
            "https://t.example.com/issues/1234",
            "https://t.example.com",
            REDMINE,
        )
        .unwrap();
        assert_eq!(id.as_str(), "1234");

        let with_anchor = resolve(
            "https://t.example.com/redmine/issues/77.json#note-3",
            "https://t.example.com/redmine",
            REDMINE,
        )
        .unwrap();
        assert_eq!(with_anchor.as_str(), "77");
    }

    #[test]
    fn rejects_other_tracker_instances() {
        let other_host = resolve(
            "https://other.example.com/issues/1234",
            "https://t.example.com",
            REDMINE,
        )
        .unwrap_err();
        assert_eq!(other_host.kind(), ErrorKind::Validation);
        assert!(other_host.to_string().contains("other.example.com"));
        assert!(other_host.to_string().contains("t.example.com"));

        let other_scheme = resolve(
            "http://t.example.com/issues/1234",
            "https://t.example.com",
            REDMINE,
        );
        assert!(other_scheme.is_err());

        let shouting = resolve(
            "HTTPS://other.example.com/issues/1234",
            "https://t.example.com",
            REDMINE,
        )
        .unwrap_err();
        assert_eq!(shouting.kind(), ErrorKind::Validation);

        let other_port = resolve(
            "https://t.example.com:8443/issues/1234",
            "https://t.example.com",
            REDMINE,
        );
        assert!(other_port.is_err());
    }

    #[test]
    fn scheme_case_does_not_matter() {
        let id = resolve(
            "HTTPS://T.Example.com/issues/42",
            "https://t.example.com",
            REDMINE,
        )
        .unwrap();
        assert_eq!(id.as_str(), "42");
    }

    #[test]
    fn explicit_default_port_matches() {
        let id = resolve(
            "https://t.example.com:443/issues/5",
            "https://t.example.com",
            REDMINE,
        )
        .unwrap();
        assert_eq!(id.as_str(), "5");
    }

    #[test]
    fn extracts_project_key() {
        let id = resolve(
            "https://space.backlog.com/view/PROJ_2-42#comment-1",
            "https://space.backlog.com",
            BACKLOG,
        )
        .unwrap();
        assert_eq!(id.as_str(), "PROJ_2-42");
    }

    #[test]
    fn unmatched_path_is_a_validation_error() {
        let err = resolve(
            "https://space.backlog.com/projects/PROJ",
            "https://space.backlog.com",
            BACKLOG,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let lowercase = resolve(
            "https://space.backlog.com/view/proj-1",
            "https://space.backlog.com",
            BACKLOG,
        );
        assert!(lowercase.is_err());
    }
}
