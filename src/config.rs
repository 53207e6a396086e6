use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider-facing endpoint settings, loaded from the user config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_base_url(),
        }
    }

    /// Read `chatflow/provider.json` from the platform config directory.
    pub fn load() -> Result<Self> {
        let path = dirs::config_dir()
            .context("could not determine config directory")?
            .join("chatflow")
            .join("provider.json");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading provider config at {}", path.display()))?;
        serde_json::from_str(&content).context("parsing provider config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_defaults_when_absent() {
        let config: ProviderConfig = serde_json::from_str(r#"{"api_key":"sk-test"}"#).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api_key, "sk-test");
    }

    #[test]
    fn test_explicit_base_url_is_kept() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"api_key":"k","base_url":"http://localhost:8080/v1"}"#)
                .unwrap();
        assert_eq!(config.base_url, "http://localhost:8080/v1");
    }
}
