use cb_domain::config::{BotConfig, Config, ConfigSeverity, WebhookConfig};
use cb_domain::model::BotMode;

const DEFAULT_CONFIG_PATH: &str = "chatbot.yaml";

/// Loads the bot-list config from YAML, falling back to a single bot built
/// from env vars when the file is absent. Either way, runs `validate()` and
/// returns its issues alongside the config so the caller decides whether an
/// `Error`-severity issue is fatal.
pub fn load_config() -> anyhow::Result<(Config, Vec<cb_domain::config::ConfigError>)> {
    let config_path = std::env::var("CB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        serde_yaml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        config_from_env()?
    };

    let issues = config.validate();
    Ok((config, issues))
}

/// Logs every validation issue and returns an error if any is `Error`-severity.
pub fn enforce(issues: &[cb_domain::config::ConfigError]) -> anyhow::Result<()> {
    for issue in issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let fatal = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();
    if fatal > 0 {
        anyhow::bail!("config validation failed with {fatal} error(s)");
    }
    Ok(())
}

/// Single-bot bootstrap from `TELEGRAM_TOKEN` / `CB_ADAPTER` / `CB_OWNER_USER_ID`
/// / `DATABASE_URL`, used when no config file is present.
fn config_from_env() -> anyhow::Result<Config> {
    let telegram_token = std::env::var("TELEGRAM_TOKEN").unwrap_or_default();
    if telegram_token.is_empty() {
        return Ok(Config::default());
    }
    let adapter = std::env::var("CB_ADAPTER").unwrap_or_else(|_| "codex".into());
    let owner_user_id = std::env::var("CB_OWNER_USER_ID").ok().and_then(|v| v.parse::<i64>().ok());
    let database_url = std::env::var("DATABASE_URL").ok();

    let bot = BotConfig {
        bot_id: "default".into(),
        name: "default".into(),
        mode: BotMode::Embedded,
        telegram_token,
        adapter,
        webhook: webhook_from_env(),
        codex: None,
        gemini: None,
        claude: None,
        owner_user_id,
        database_url,
    };

    Ok(Config { bots: vec![bot], ..Config::default() })
}

fn webhook_from_env() -> Option<WebhookConfig> {
    let path_secret = std::env::var("CB_WEBHOOK_PATH_SECRET").ok()?;
    let secret_token = std::env::var("CB_WEBHOOK_SECRET_TOKEN").ok()?;
    let public_url = std::env::var("CB_WEBHOOK_PUBLIC_URL").ok();
    Some(WebhookConfig { path_secret, secret_token, public_url })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforce_passes_through_warnings() {
        let issues = vec![cb_domain::config::ConfigError {
            severity: ConfigSeverity::Warning,
            field: "bots".into(),
            message: "no bots configured".into(),
        }];
        assert!(enforce(&issues).is_ok());
    }

    #[test]
    fn enforce_rejects_any_error_severity_issue() {
        let issues = vec![cb_domain::config::ConfigError {
            severity: ConfigSeverity::Error,
            field: "bots[0].bot_id".into(),
            message: "bot_id must not be empty".into(),
        }];
        assert!(enforce(&issues).is_err());
    }
}
