use clap::{Args, Subcommand};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::services::registry;

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Show the loaded configuration (secrets masked).
    Show,
    /// Check every configured backend for missing settings without contacting it.
    Check,
}

pub fn run(config: &AppConfig, command: ConfigCommand) -> AppResult<()> {
    match command {
        ConfigCommand::Show => run_show(config),
        ConfigCommand::Check => run_check(config),
    }
}

fn run_show(config: &AppConfig) -> AppResult<()> {
    println!("Default backend: {}", display_value(&config.default_backend));
    if config.backends.is_empty() {
        println!("No backends configured.");
        return Ok(());
    }

    for (name, settings) in &config.backends {
        println!();
        println!("[{name}]");
        println!("Base URL: {}", display_value(&settings.base_url));
        println!("API key: {}", mask_secret(&settings.api_key));
        println!("Username: {}", display_value(&settings.username));
        println!("Password: {}", mask_secret(&settings.password));
        if !settings.status_ids.is_empty() {
            let statuses = settings
                .status_ids
                .iter()
                .map(|(status, id)| format!("{status}={id}"))
                .collect::<Vec<_>>()
                .join(", ");
            println!("Status ids: {statuses}");
        }
        let defaults = settings.defaults.names();
        if !defaults.is_empty() {
            println!("Defaults for: {}", defaults.join(", "));
        }
        println!(
            "Retry: fetch x{}, update x{}",
            settings.retry.fetch_attempts, settings.retry.update_attempts
        );
    }

    Ok(())
}

fn run_check(config: &AppConfig) -> AppResult<()> {
    if config.backends.is_empty() {
        return Err(AppError::Configuration("no backends configured".to_string()));
    }

    let mut failures = 0;
    for (name, settings) in &config.backends {
        let Some(plugin) = registry::lookup(name) else {
            failures += 1;
            println!(
                "{name}: unknown backend (known: {})",
                registry::backend_names().join(", ")
            );
            continue;
        };

        let report = plugin.validate(settings);
        if report.valid {
            println!("{name}: ok");
        } else {
            failures += 1;
            for error in &report.errors {
                println!("{name}: {error}");
            }
        }
    }

    if failures > 0 {
        return Err(AppError::Configuration(format!(
            "{failures} backend(s) have configuration problems"
        )));
    }
    Ok(())
}

fn display_value(value: &Option<String>) -> String {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<not set>".to_string())
}

fn mask_secret(value: &Option<String>) -> String {
    match value {
        Some(token) if token.chars().count() > 6 => {
            let chars: Vec<char> = token.chars().collect();
            let prefix: String = chars[..3].iter().collect();
            let suffix: String = chars[chars.len() - 3..].iter().collect();
            format!("{prefix}***{suffix}")
        }
        Some(token) if !token.is_empty() => "***".to_string(),
        _ => "<not set>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_secrets() {
        assert_eq!(mask_secret(&Some("abcdef123456".to_string())), "abc***456");
        assert_eq!(mask_secret(&Some("short".to_string())), "***");
        assert_eq!(mask_secret(&None), "<not set>");
    }

    #[test]
    fn check_fails_on_incomplete_backends() {
        let config = AppConfig::from_yaml(
            "backends:\n  redmine:\n    base_url: https://t.example.com\n    username: alice\n",
        )
        .unwrap();
        assert!(run(&config, ConfigCommand::Check).is_err());
    }
}
