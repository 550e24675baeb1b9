use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{debug, info};

use crate::context::AppContext;
use crate::domain::fields::{TicketFields, merge};
use crate::domain::heading::HeadingStyle;
use crate::domain::identifier::TicketId;
use crate::domain::ticket::LocalTicket;
use crate::error::{AppError, AppResult};
use crate::services::{FetchOptions, PluginDescriptor, UpdateOutcome, UpdateRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

impl OutputFormat {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "markdown" | "md" => Some(OutputFormat::Markdown),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchArgs {
    /// Bare identifier or tracker URL.
    pub target: String,
    pub format: OutputFormat,
    /// Directory to write into, or an exact file path. `None` leaves writing
    /// to the caller.
    pub destination: Option<PathBuf>,
    pub heading: HeadingStyle,
}

pub struct FetchOutcome {
    pub id: TicketId,
    pub ticket: LocalTicket,
    pub rendered: String,
    pub written_to: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateArgs {
    /// Path of a local ticket file, or an identifier/URL.
    pub target: String,
    pub overrides: BTreeMap<String, String>,
    pub dry_run: bool,
}

pub async fn fetch_ticket(ctx: &AppContext, args: FetchArgs) -> AppResult<FetchOutcome> {
    let descriptor = ctx.plugin.descriptor();
    ctx.plugin
        .validate(&ctx.settings)
        .into_result(descriptor.label)?;

    let id = ctx.plugin.resolve_identifier(&args.target, &ctx.settings)?;
    info!(backend = descriptor.name, %id, "fetching ticket");

    let options = FetchOptions {
        heading: args.heading,
    };
    let ticket = ctx.plugin.fetch(&ctx.settings, &id, &options).await?;
    let rendered = render(&ticket, args.format)?;

    let written_to = match &args.destination {
        Some(hint) => {
            let path = destination_path(hint, descriptor, &id, args.format);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &rendered).await?;
            debug!(path = %path.display(), "wrote ticket");
            Some(path)
        }
        None => None,
    };

    Ok(FetchOutcome {
        id,
        ticket,
        rendered,
        written_to,
    })
}

/// Builds the update from explicit overrides, the local file (when the
/// target is one) and backend defaults, in that order of precedence.
pub async fn update_ticket(ctx: &AppContext, args: UpdateArgs) -> AppResult<UpdateOutcome> {
    let descriptor = ctx.plugin.descriptor();
    ctx.plugin
        .validate(&ctx.settings)
        .into_result(descriptor.label)?;

    let explicit = TicketFields::from_overrides(&args.overrides)?;
    let (id, from_file) = match read_local(&args.target).await? {
        Some(ticket) => {
            let id = ctx
                .plugin
                .extract_identifier(&ticket.metadata)
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "cannot determine which {} ticket '{}' maps to; its front matter has no identifier",
                        descriptor.label, args.target
                    ))
                })?;
            (id, TicketFields::from_local(&ticket)?)
        }
        None => (
            ctx.plugin.resolve_identifier(&args.target, &ctx.settings)?,
            TicketFields::default(),
        ),
    };

    let fields = merge(explicit, from_file, ctx.settings.defaults.clone());
    info!(
        backend = descriptor.name,
        %id,
        fields = ?fields.names(),
        dry_run = args.dry_run,
        "updating ticket"
    );

    let request = UpdateRequest {
        fields,
        dry_run: args.dry_run,
    };
    ctx.plugin.update(&ctx.settings, &id, &request).await
}

pub fn render(ticket: &LocalTicket, format: OutputFormat) -> AppResult<String> {
    match format {
        OutputFormat::Markdown => ticket.to_document(),
        OutputFormat::Json => {
            let metadata = serde_json::to_value(&ticket.metadata)
                .map_err(|err| AppError::unexpected("converting front matter to JSON", err))?;
            let document = json!({
                "metadata": metadata,
                "title": ticket.title,
                "body": ticket.body,
            });
            serde_json::to_string_pretty(&document)
                .map_err(|err| AppError::unexpected("rendering ticket JSON", err))
        }
    }
}

fn destination_path(
    hint: &Path,
    descriptor: &PluginDescriptor,
    id: &TicketId,
    format: OutputFormat,
) -> PathBuf {
    let looks_like_dir =
        hint.is_dir() || hint.to_string_lossy().ends_with(|c: char| c == '/' || c == '\\');
    if looks_like_dir {
        hint.join(format!(
            "{}{}.{}",
            descriptor.file_prefix,
            id,
            format.extension()
        ))
    } else {
        hint.to_path_buf()
    }
}

async fn read_local(target: &str) -> AppResult<Option<LocalTicket>> {
    let path = Path::new(target);
    if !path.is_file() {
        return Ok(None);
    }
    let contents = tokio::fs::read_to_string(path).await?;
    LocalTicket::parse_document(&contents)
        .map(Some)
        .map_err(|err| AppError::Validation(format!("{}: {err}", path.display())))
}
