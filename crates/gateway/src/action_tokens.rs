use cb_domain::model::ActionTokenPayload;
use cb_domain::Result;
use cb_store::Store;
use rand::RngCore;

const TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Mints a 128-bit random token, stores its payload, and returns the
/// inline-keyboard callback data string (`act:<token>`) for it.
pub async fn issue(
    store: &Store,
    bot_id: &str,
    chat_id: &str,
    action_type: &str,
    run_source: &str,
    session_id: &str,
    origin_turn_id: &str,
    now_ms: i64,
) -> Result<String> {
    let token = random_token();
    let payload = ActionTokenPayload {
        action_type: action_type.to_string(),
        run_source: run_source.to_string(),
        chat_id: chat_id.to_string(),
        session_id: session_id.to_string(),
        origin_turn_id: origin_turn_id.to_string(),
    };
    let payload_json = serde_json::to_string(&payload)?;
    store
        .create_token(&token, bot_id, chat_id, action_type, &payload_json, now_ms + TOKEN_TTL_MS)
        .await?;
    cb_domain::trace::TraceEvent::ActionTokenIssued {
        token_id: token.clone(),
        action_type: action_type.to_string(),
        chat_id: chat_id.to_string(),
    }
    .emit();
    Ok(format!("act:{token}"))
}

/// Extracts the token from a callback_data string of the form `act:<token>`.
/// Returns `None` for any other shape, including the legacy `stop_run`
/// literal the command handler special-cases separately.
pub fn token_from_callback_data(data: &str) -> Option<&str> {
    data.strip_prefix("act:")
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_from_callback_data_strips_the_act_prefix() {
        assert_eq!(token_from_callback_data("act:deadbeef"), Some("deadbeef"));
        assert_eq!(token_from_callback_data("stop_run"), None);
    }

    #[test]
    fn random_token_is_32_hex_chars() {
        let t = random_token();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
