use std::path::PathBuf;

use clap::Args;

use crate::context::AppContext;
use crate::domain::heading::HeadingStyle;
use crate::error::{AppError, AppResult};
use crate::workflow::sync::{FetchArgs, OutputFormat, fetch_ticket};

#[derive(Args, Debug, Clone)]
pub struct FetchCommandArgs {
    /// Ticket identifier or tracker URL.
    pub target: String,
    /// Output format: markdown or json.
    #[arg(short, long, default_value = "markdown")]
    pub format: String,
    /// File or directory to write to; prints to stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Title heading notation: atx (`# Title`) or setext (underlined).
    #[arg(long, default_value = "atx")]
    pub heading: String,
}

pub async fn run(ctx: &AppContext, args: FetchCommandArgs) -> AppResult<()> {
    let format = OutputFormat::from_str(&args.format).ok_or_else(|| {
        AppError::Validation(format!(
            "unknown format '{}'; expected markdown or json",
            args.format
        ))
    })?;
    let heading = HeadingStyle::from_str(&args.heading).ok_or_else(|| {
        AppError::Validation(format!(
            "unknown heading style '{}'; expected atx or setext",
            args.heading
        ))
    })?;

    let outcome = fetch_ticket(
        ctx,
        FetchArgs {
            target: args.target,
            format,
            destination: args.output,
            heading,
        },
    )
    .await?;

    match &outcome.written_to {
        Some(path) => println!("Ticket {} saved to {}", outcome.id, path.display()),
        None => print!("{}", outcome.rendered),
    }
    Ok(())
}
