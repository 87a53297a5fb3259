//! Assistant settings and the chat session derived from them
//!
//! Both serialize with camelCase JSON; those names are the field names used
//! by `ConfigTransaction`. API keys are masked when rendered for logs
//! (first 8 + last 4 characters visible).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// User-editable assistant configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantSettings {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.7,
        }
    }
}

impl AssistantSettings {
    /// Settings with the API key masked, for logging
    pub fn redacted(&self) -> Self {
        Self {
            api_key: self.api_key.as_deref().map(mask_api_key),
            ..self.clone()
        }
    }
}

crate::field_access!(AssistantSettings {
    "provider" => provider,
    "model" => model,
    "baseUrl" => base_url,
    "apiKey" => api_key,
    "temperature" => temperature,
});

/// Live chat session bound to a set of settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub active_model: String,
    pub endpoint: String,
    pub system_prompt: String,
    pub connected: bool,
}

impl ChatSession {
    /// Rebind the session to `settings`
    pub fn bind(&mut self, settings: &AssistantSettings) -> Result<()> {
        if settings.model.trim().is_empty() {
            return Err(Error::Validation("model must not be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&settings.temperature) {
            return Err(Error::Validation(format!(
                "temperature {} out of range [0, 2]",
                settings.temperature
            )));
        }

        self.active_model = settings.model.clone();
        self.endpoint = settings
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://api.{}.com/v1", settings.provider));
        self.connected = true;
        tracing::info!(settings = ?settings.redacted(), "Bound chat session");
        Ok(())
    }
}

crate::field_access!(ChatSession {
    "activeModel" => active_model,
    "endpoint" => endpoint,
    "systemPrompt" => system_prompt,
    "connected" => connected,
});

/// Mask an API key for display: show first 8 + last 4 chars
pub fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}
