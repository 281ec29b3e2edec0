pub mod claude;
pub mod codex;
pub mod echo;
pub mod gemini;
pub mod process;
pub mod registry;
pub mod traits;

pub use registry::{AdapterRegistry, SUPPORTED_CLI_PROVIDERS};
pub use traits::{AdapterEvent, CancelFlag, CliAdapter, RunRequest};

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::event::CliEventKind;
    use futures_util::StreamExt;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[tokio::test]
    async fn echo_adapter_yields_the_fixed_event_sequence() {
        let adapter = echo::EchoAdapter::new();
        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
        let req = RunRequest {
            prompt: "hello".into(),
            model: "default".into(),
            sandbox: String::new(),
            preamble: String::new(),
        };
        let mut stream = adapter.run_new(req, cancel).await.unwrap();

        let mut kinds = Vec::new();
        while let Some(event) = stream.next().await {
            kinds.push(event.unwrap().kind);
        }

        assert!(matches!(kinds[0], CliEventKind::ThreadStarted { .. }));
        assert!(matches!(kinds[1], CliEventKind::TurnStarted));
        match &kinds[2] {
            CliEventKind::AssistantMessage { text } => assert_eq!(text, "hello"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(kinds[3], CliEventKind::TurnCompleted { .. }));
    }

    #[tokio::test]
    async fn echo_adapter_honors_cancel_flag() {
        let adapter = echo::EchoAdapter::new();
        let cancel: CancelFlag = Arc::new(AtomicBool::new(true));
        let req = RunRequest {
            prompt: "hello".into(),
            model: "default".into(),
            sandbox: String::new(),
            preamble: String::new(),
        };
        let mut stream = adapter.run_new(req, cancel).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first.kind, CliEventKind::Error { .. }));
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(
            second.kind,
            CliEventKind::TurnCompleted {
                status: cb_domain::event::TurnOutcome::Cancelled
            }
        ));
    }

    #[test]
    fn registry_resolves_all_supported_providers() {
        let registry = AdapterRegistry::with_defaults();
        for name in SUPPORTED_CLI_PROVIDERS {
            assert!(registry.get(name).is_some(), "missing adapter: {name}");
        }
        assert!(registry.get("echo").is_some());
        assert!(registry.get("not-a-provider").is_none());
    }

    #[test]
    fn codex_normalize_maps_thread_started() {
        let adapter = codex::CodexAdapter::new();
        let kinds = adapter.normalize(r#"{"type":"thread.started","thread_id":"t1"}"#);
        assert_eq!(kinds.len(), 2);
        match &kinds[0] {
            CliEventKind::ThreadStarted { thread_id } => assert_eq!(thread_id, "t1"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(kinds[1], CliEventKind::TurnStarted));
    }

    #[test]
    fn codex_normalize_invalid_json_becomes_error() {
        let adapter = codex::CodexAdapter::new();
        let kinds = adapter.normalize("not json");
        assert_eq!(kinds.len(), 1);
        assert!(matches!(kinds[0], CliEventKind::Error { .. }));
    }

    #[test]
    fn gemini_normalize_maps_assistant_message() {
        let adapter = gemini::GeminiAdapter::new();
        let kinds = adapter.normalize(r#"{"type":"message","role":"assistant","content":"hi"}"#);
        match &kinds[0] {
            CliEventKind::AssistantMessage { text } => assert_eq!(text, "hi"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn claude_normalize_joins_content_blocks() {
        let adapter = claude::ClaudeAdapter::new();
        let kinds = adapter.normalize(
            r#"{"type":"assistant","message":{"content":[{"text":"foo"},{"text":"bar"}]}}"#,
        );
        match &kinds[0] {
            CliEventKind::AssistantMessage { text } => assert_eq!(text, "foobar"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
