pub mod backlog;
pub mod http;
pub mod redmine;
pub mod retry;
