//! Title heading at the top of a ticket body.
//!
//! Two notations are understood: ATX (`# Title`) and setext (`Title`
//! followed by a line of `=`). Setext headings underlined with `-` are
//! accepted when reading.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeadingStyle {
    #[default]
    Atx,
    Setext,
}

impl HeadingStyle {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "atx" | "hash" => Some(HeadingStyle::Atx),
            "setext" | "underline" => Some(HeadingStyle::Setext),
            _ => None,
        }
    }
}

pub fn render(title: &str, body: &str, style: HeadingStyle) -> String {
    let title = title.trim();
    if title.is_empty() {
        return body.to_string();
    }

    let heading = match style {
        // A trailing ` #` would read back as a closing sequence.
        HeadingStyle::Atx if ends_like_closing_sequence(title) => format!("# {title} #"),
        HeadingStyle::Atx => format!("# {title}"),
        HeadingStyle::Setext => {
            let width = title.chars().count().max(3);
            format!("{title}\n{}", "=".repeat(width))
        }
    };

    if body.is_empty() {
        format!("{heading}\n")
    } else {
        format!("{heading}\n\n{body}")
    }
}

/// Splits the leading title heading off a body. Without a heading the whole
/// body is returned untouched and no title is proposed. Only the single
/// blank line written after the heading is dropped; further blank lines
/// belong to the description.
pub fn split(body: &str) -> (Option<String>, String) {
    let text = skip_blank_lines(body);
    let (first, after_first) = next_line(text);

    if let Some(title) = atx_title(first) {
        return (Some(title), skip_separator(after_first).to_string());
    }

    let (second, after_second) = next_line(after_first);
    if !first.trim().is_empty() && !after_first.is_empty() && is_setext_underline(second) {
        return (
            Some(first.trim().to_string()),
            skip_separator(after_second).to_string(),
        );
    }

    (None, body.to_string())
}

fn next_line(text: &str) -> (&str, &str) {
    match text.find('\n') {
        Some(idx) => (&text[..idx], &text[idx + 1..]),
        None => (text, ""),
    }
}

fn skip_blank_lines(mut text: &str) -> &str {
    while !text.is_empty() {
        let (line, rest) = next_line(text);
        if !line.trim().is_empty() {
            break;
        }
        text = rest;
    }
    text
}

fn skip_separator(text: &str) -> &str {
    let (line, rest) = next_line(text);
    if line.trim().is_empty() { rest } else { text }
}

fn ends_like_closing_sequence(title: &str) -> bool {
    let without_closing = title.trim_end_matches('#');
    without_closing.len() < title.len()
        && (without_closing.is_empty() || without_closing.ends_with(char::is_whitespace))
}

fn atx_title(line: &str) -> Option<String> {
    let rest = line.strip_prefix('#')?;
    // `##` and deeper are section headings, not the ticket title.
    if rest.starts_with('#') || !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }

    let mut title = rest.trim();
    if ends_like_closing_sequence(title) {
        title = title.trim_end_matches('#').trim_end();
    }

    (!title.is_empty()).then(|| title.to_string())
}

fn is_setext_underline(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty()
        && (line.chars().all(|c| c == '=') || (line.len() >= 2 && line.chars().all(|c| c == '-')))
}
