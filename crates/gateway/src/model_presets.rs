use cb_domain::config::{BotConfig, ProviderModelConfig};

/// One adapter's allowed model names plus its preferred default, in the
/// order `/providers` should list them.
pub struct ModelPreset {
    pub adapter: &'static str,
    pub allowed: &'static [&'static str],
    pub preferred_default: &'static str,
}

pub const MODEL_PRESETS: &[ModelPreset] = &[
    ModelPreset {
        adapter: "codex",
        allowed: &["gpt-5-codex", "gpt-5", "o4-mini"],
        preferred_default: "gpt-5-codex",
    },
    ModelPreset {
        adapter: "gemini",
        allowed: &["gemini-2.5-pro", "gemini-2.5-flash"],
        preferred_default: "gemini-2.5-pro",
    },
    ModelPreset {
        adapter: "claude",
        allowed: &["claude-opus-4", "claude-sonnet-4"],
        preferred_default: "claude-sonnet-4",
    },
];

pub fn preset_for(adapter: &str) -> Option<&'static ModelPreset> {
    MODEL_PRESETS.iter().find(|p| p.adapter == adapter)
}

pub fn is_allowed_model(adapter: &str, model: &str) -> bool {
    preset_for(adapter).is_some_and(|p| p.allowed.contains(&model))
}

/// Resolution chain for "what model does this turn use": the session's
/// explicit model if allowed → the bot config's configured default if
/// allowed → the adapter's preferred default → the allow-list's first
/// entry.
pub fn resolve_selected_model(
    adapter: &str,
    session_model: Option<&str>,
    bot_config: &BotConfig,
) -> String {
    let preset = preset_for(adapter);

    if let Some(m) = session_model {
        if is_allowed_model(adapter, m) {
            return m.to_string();
        }
    }

    let bot_default = match adapter {
        "codex" => bot_config.codex.as_ref(),
        "gemini" => bot_config.gemini.as_ref(),
        "claude" => bot_config.claude.as_ref(),
        _ => None,
    }
    .and_then(|p: &ProviderModelConfig| p.model.as_deref());
    if let Some(m) = bot_default {
        if is_allowed_model(adapter, m) {
            return m.to_string();
        }
    }

    match preset {
        Some(preset) if preset.allowed.contains(&preset.preferred_default) => {
            preset.preferred_default.to_string()
        }
        Some(preset) => preset.allowed.first().map(|s| s.to_string()).unwrap_or_default(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot_config(codex_model: Option<&str>) -> BotConfig {
        BotConfig {
            bot_id: "b".into(),
            name: "B".into(),
            mode: cb_domain::model::BotMode::Embedded,
            telegram_token: "t".into(),
            adapter: "codex".into(),
            webhook: None,
            codex: Some(ProviderModelConfig { model: codex_model.map(|s| s.to_string()) }),
            gemini: None,
            claude: None,
            owner_user_id: None,
            database_url: None,
        }
    }

    #[test]
    fn session_explicit_model_wins_when_allowed() {
        let cfg = bot_config(Some("gpt-5"));
        let resolved = resolve_selected_model("codex", Some("o4-mini"), &cfg);
        assert_eq!(resolved, "o4-mini");
    }

    #[test]
    fn session_model_outside_allow_list_falls_through_to_bot_default() {
        let cfg = bot_config(Some("gpt-5"));
        let resolved = resolve_selected_model("codex", Some("not-a-real-model"), &cfg);
        assert_eq!(resolved, "gpt-5");
    }

    #[test]
    fn falls_back_to_preferred_default_when_nothing_else_set() {
        let cfg = bot_config(None);
        let resolved = resolve_selected_model("codex", None, &cfg);
        assert_eq!(resolved, "gpt-5-codex");
    }

    #[test]
    fn unknown_adapter_resolves_to_empty_string() {
        let cfg = bot_config(None);
        let resolved = resolve_selected_model("unknown", None, &cfg);
        assert_eq!(resolved, "");
    }

    #[test]
    fn is_allowed_model_rejects_unlisted_models() {
        assert!(is_allowed_model("gemini", "gemini-2.5-pro"));
        assert!(!is_allowed_model("gemini", "gpt-5"));
    }
}
