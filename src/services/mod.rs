pub mod issue_tracker;
pub mod registry;
pub mod update_plan;

pub use issue_tracker::{
    FetchOptions, IssueTrackerPlugin, PluginDescriptor, UpdateOutcome, UpdateRequest,
    ValidationReport,
};
pub use update_plan::UpdatePlan;
