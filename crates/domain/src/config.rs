use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::BotMode;

/// Top-level config file: a list of bots plus process-wide defaults.
/// Loaded from YAML at startup; env vars only ever supply a single-bot
/// fallback so a bare `TELEGRAM_TOKEN` is enough to get one bot running.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bots: Vec<BotConfig>,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot_id: String,
    pub name: String,
    #[serde(default = "d_mode")]
    pub mode: BotMode,
    pub telegram_token: String,
    pub adapter: String,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub codex: Option<ProviderModelConfig>,
    #[serde(default)]
    pub gemini: Option<ProviderModelConfig>,
    #[serde(default)]
    pub claude: Option<ProviderModelConfig>,
    #[serde(default)]
    pub owner_user_id: Option<i64>,
    #[serde(default)]
    pub database_url: Option<String>,
}

fn d_mode() -> BotMode {
    BotMode::Embedded
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub path_secret: String,
    pub secret_token: String,
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderModelConfig {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "d_admin_host")]
    pub host: String,
    #[serde(default = "d_admin_port")]
    pub port: u16,
    #[serde(default = "d_admin_token_env")]
    pub token_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: d_admin_host(),
            port: d_admin_port(),
            token_env: d_admin_token_env(),
        }
    }
}

fn d_admin_host() -> String {
    "0.0.0.0".into()
}

fn d_admin_port() -> u16 {
    8080
}

fn d_admin_token_env() -> String {
    "CB_ADMIN_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// Require a distinct `database_url` per bot when running multiple bots
    /// in one process, so one bot's lease storm can't starve another's.
    #[serde(default)]
    pub strict_isolation: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            strict_isolation: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. An empty
    /// vec means nothing is wrong; callers should refuse to start on any
    /// `ConfigSeverity::Error`.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.bots.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "bots".into(),
                message: "no bots configured".into(),
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_tokens: HashSet<&str> = HashSet::new();

        for (i, bot) in self.bots.iter().enumerate() {
            if bot.bot_id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("bots[{i}].bot_id"),
                    message: "bot_id must not be empty".into(),
                });
            } else if !seen_ids.insert(&bot.bot_id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("bots[{i}].bot_id"),
                    message: format!("duplicate bot_id \"{}\"", bot.bot_id),
                });
            }

            if bot.telegram_token.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("bots[{i}].telegram_token"),
                    message: "telegram_token must not be empty".into(),
                });
            } else if !seen_tokens.insert(&bot.telegram_token) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("bots[{i}].telegram_token"),
                    message: "duplicate telegram_token across bots".into(),
                });
            }

            if !matches!(bot.adapter.as_str(), "codex" | "gemini" | "claude") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("bots[{i}].adapter"),
                    message: format!(
                        "unknown adapter \"{}\" (expected codex, gemini, or claude)",
                        bot.adapter
                    ),
                });
            }

            if let Some(webhook) = &bot.webhook {
                if webhook.path_secret.is_empty() {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("bots[{i}].webhook.path_secret"),
                        message: "path_secret must not be empty when webhook is configured".into(),
                    });
                }
                if webhook.secret_token.is_empty() {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("bots[{i}].webhook.secret_token"),
                        message: "secret_token must not be empty when webhook is configured".into(),
                    });
                }
            }

            if self.database.strict_isolation
                && bot.database_url.is_none()
                && self.database.url.is_none()
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("bots[{i}].database_url"),
                    message: "database_url is required per-bot under strict_isolation".into(),
                });
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            bots: vec![BotConfig {
                bot_id: "main".into(),
                name: "Main Bot".into(),
                mode: BotMode::Embedded,
                telegram_token: "123:ABC".into(),
                adapter: "codex".into(),
                webhook: None,
                codex: None,
                gemini: None,
                claude: None,
                owner_user_id: Some(42),
                database_url: None,
            }],
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn empty_bot_id_is_error() {
        let mut cfg = valid_config();
        cfg.bots[0].bot_id = String::new();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "bots[0].bot_id").expect("expected bot_id error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn duplicate_bot_id_is_error() {
        let mut cfg = valid_config();
        let mut second = cfg.bots[0].clone();
        second.telegram_token = "456:DEF".into();
        cfg.bots.push(second);
        let issues = cfg.validate();
        let dup = issues
            .iter()
            .filter(|e| e.message.contains("duplicate bot_id"))
            .count();
        assert_eq!(dup, 1);
    }

    #[test]
    fn duplicate_token_is_error() {
        let mut cfg = valid_config();
        let mut second = cfg.bots[0].clone();
        second.bot_id = "second".into();
        cfg.bots.push(second);
        let issues = cfg.validate();
        let dup = issues
            .iter()
            .filter(|e| e.message.contains("duplicate telegram_token"))
            .count();
        assert_eq!(dup, 1);
    }

    #[test]
    fn unknown_adapter_is_error() {
        let mut cfg = valid_config();
        cfg.bots[0].adapter = "gpt4all".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "bots[0].adapter").expect("expected adapter error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn webhook_requires_secrets() {
        let mut cfg = valid_config();
        cfg.bots[0].webhook = Some(WebhookConfig {
            path_secret: String::new(),
            secret_token: String::new(),
            public_url: None,
        });
        let issues = cfg.validate();
        assert!(find_issue(&issues, "bots[0].webhook.path_secret").is_some());
        assert!(find_issue(&issues, "bots[0].webhook.secret_token").is_some());
    }

    #[test]
    fn no_bots_is_warning() {
        let cfg = Config::default();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "bots").expect("expected no-bots warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn strict_isolation_requires_database_url() {
        let mut cfg = valid_config();
        cfg.database.strict_isolation = true;
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "bots[0].database_url").expect("expected database_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "bots[0].bot_id".into(),
            message: "bot_id must not be empty".into(),
        };
        assert_eq!(
            format!("{err}"),
            "[ERROR] bots[0].bot_id: bot_id must not be empty"
        );
    }
}
