use std::collections::HashMap;
use std::sync::Arc;

use crate::claude::ClaudeAdapter;
use crate::codex::CodexAdapter;
use crate::echo::EchoAdapter;
use crate::gemini::GeminiAdapter;
use crate::traits::CliAdapter;

/// Holds one instance per supported adapter, looked up by provider name.
/// The run worker and command handler resolve `session.adapter_name`
/// through this registry rather than matching on provider strings themselves.
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn CliAdapter>>,
}

impl AdapterRegistry {
    /// The three CLI providers plus the `echo` test adapter, always registered.
    pub fn with_defaults() -> Self {
        let mut adapters: HashMap<&'static str, Arc<dyn CliAdapter>> = HashMap::new();
        adapters.insert("codex", Arc::new(CodexAdapter::new()));
        adapters.insert("gemini", Arc::new(GeminiAdapter::new()));
        adapters.insert("claude", Arc::new(ClaudeAdapter::new()));
        adapters.insert("echo", Arc::new(EchoAdapter::new()));
        Self { adapters }
    }

    pub fn get(&self, provider_name: &str) -> Option<Arc<dyn CliAdapter>> {
        self.adapters.get(provider_name).cloned()
    }

    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.adapters.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub const SUPPORTED_CLI_PROVIDERS: [&str; 3] = ["codex", "gemini", "claude"];
