use crate::infra::backlog::BacklogPlugin;
use crate::infra::redmine::RedminePlugin;
use crate::services::IssueTrackerPlugin;

static REDMINE: RedminePlugin = RedminePlugin;
static BACKLOG: BacklogPlugin = BacklogPlugin;

static PLUGINS: [&(dyn IssueTrackerPlugin); 2] = [&REDMINE, &BACKLOG];

/// Finds the backend registered under `name` (its config section key).
pub fn lookup(name: &str) -> Option<&'static dyn IssueTrackerPlugin> {
    let name = name.trim();
    PLUGINS
        .iter()
        .copied()
        .find(|plugin| plugin.descriptor().name.eq_ignore_ascii_case(name))
}

pub fn backend_names() -> Vec<&'static str> {
    PLUGINS
        .iter()
        .map(|plugin| plugin.descriptor().name)
        .collect()
}
