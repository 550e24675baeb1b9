use std::collections::BTreeMap;

use clap::Args;

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::workflow::sync::{UpdateArgs, update_ticket};

#[derive(Args, Debug, Clone)]
pub struct UpdateCommandArgs {
    /// Local ticket file, or a ticket identifier/URL.
    pub target: String,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub priority: Option<String>,
    /// Numeric user id of the new assignee.
    #[arg(long)]
    pub assignee: Option<String>,
    /// YYYY-MM-DD; pass an empty value to clear.
    #[arg(long)]
    pub start_date: Option<String>,
    /// YYYY-MM-DD; pass an empty value to clear.
    #[arg(long)]
    pub due_date: Option<String>,
    #[arg(long)]
    pub done_ratio: Option<String>,
    #[arg(long)]
    pub estimated_hours: Option<String>,
    #[arg(long)]
    pub actual_hours: Option<String>,
    /// Comment added to the issue's history.
    #[arg(short, long)]
    pub comment: Option<String>,
    /// Extra `field=value` overrides.
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    pub set: Vec<String>,
    /// Show what would be sent without writing anything.
    #[arg(long)]
    pub dry_run: bool,
    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

impl UpdateCommandArgs {
    fn overrides(&self) -> AppResult<BTreeMap<String, String>> {
        let mut overrides = BTreeMap::new();
        for pair in &self.set {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                AppError::Validation(format!("'--set {pair}' must look like field=value"))
            })?;
            overrides.insert(key.trim().to_string(), value.to_string());
        }

        let flags = [
            ("subject", &self.subject),
            ("description", &self.description),
            ("status", &self.status),
            ("priority", &self.priority),
            ("assignee", &self.assignee),
            ("start_date", &self.start_date),
            ("due_date", &self.due_date),
            ("done_ratio", &self.done_ratio),
            ("estimated_hours", &self.estimated_hours),
            ("actual_hours", &self.actual_hours),
            ("comment", &self.comment),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                overrides.insert(key.to_string(), value.clone());
            }
        }
        Ok(overrides)
    }
}

pub async fn run(ctx: &AppContext, args: UpdateCommandArgs) -> AppResult<()> {
    let overrides = args.overrides()?;
    let outcome = update_ticket(
        ctx,
        UpdateArgs {
            target: args.target.clone(),
            overrides,
            dry_run: args.dry_run,
        },
    )
    .await?;

    if args.json {
        let rendered = serde_json::to_string_pretty(&outcome)
            .map_err(|err| AppError::unexpected("rendering update result", err))?;
        println!("{rendered}");
        return Ok(());
    }

    println!("{}", outcome.message);
    if outcome.simulated {
        println!("{}", outcome.payload);
    }
    for warning in &outcome.warnings {
        eprintln!("Warning: {warning}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: UpdateCommandArgs,
    }

    #[test]
    fn flags_override_set_pairs() {
        let harness = Harness::parse_from([
            "update",
            "1234",
            "--set",
            "status=New",
            "--set",
            "due_date=",
            "--status",
            "Closed",
            "--comment",
            "done",
        ]);
        let overrides = harness.args.overrides().unwrap();
        assert_eq!(overrides.get("status").map(String::as_str), Some("Closed"));
        assert_eq!(overrides.get("due_date").map(String::as_str), Some(""));
        assert_eq!(overrides.get("comment").map(String::as_str), Some("done"));
    }

    #[test]
    fn malformed_set_pair_is_rejected() {
        let harness = Harness::parse_from(["update", "1234", "--set", "status"]);
        assert!(harness.args.overrides().is_err());
    }
}
