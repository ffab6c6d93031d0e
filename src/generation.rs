//! Answer generation against a local LLM.
//!
//! Defines the [`LlmGenerator`] trait and two implementations:
//! - **[`OllamaGenerator`]** — calls an Ollama instance's `/api/generate`
//!   endpoint with the configured sampling options.
//! - **[`DisabledGenerator`]** — always errors; used when generation is not
//!   configured. Retrieval still works without it; the query pipeline
//!   reports the error instead of an answer.
//!
//! Generation requests are not retried. A generation call is expensive and
//! user-facing; on failure the query returns an error result immediately
//! rather than stalling for another model run.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};

/// Trait for answer generators.
#[async_trait]
pub trait LlmGenerator: Send + Sync {
    /// Model identifier (e.g. `"llama3.2:3b"`).
    fn model_name(&self) -> &str;

    /// Generate a completion for a fully assembled prompt.
    ///
    /// The prompt already contains any retrieved context; this layer
    /// does not know about documents or questions.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Cheap reachability probe, used for status reporting.
    async fn is_available(&self) -> bool;
}

/// A no-op generator that always returns errors.
pub struct DisabledGenerator;

#[async_trait]
impl LlmGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(RagError::Provider("generation provider is disabled".into()))
    }

    async fn is_available(&self) -> bool {
        false
    }
}

/// Generator backed by a local Ollama instance.
pub struct OllamaGenerator {
    url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Provider(format!("http client: {}", e)))?;
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            client,
        })
    }
}

#[async_trait]
impl LlmGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
                "top_p": self.top_p,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::Provider(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::Provider(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::Provider(format!("Ollama response: {}", e)))?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                RagError::Provider("invalid Ollama response: missing response field".into())
            })
    }

    async fn is_available(&self) -> bool {
        let probe = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build();
        let client = match probe {
            Ok(c) => c,
            Err(_) => return false,
        };
        match client.get(format!("{}/api/tags", self.url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Create the appropriate [`LlmGenerator`] based on configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn LlmGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => Err(RagError::Provider(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let generator = DisabledGenerator;
        assert_eq!(generator.model_name(), "disabled");
        assert!(!generator.is_available().await);
        let err = generator.generate("any prompt").await.unwrap_err();
        assert_eq!(err.category(), "provider");
    }

    #[test]
    fn test_create_generator() {
        let disabled = create_generator(&GenerationConfig {
            provider: "disabled".to_string(),
            ..GenerationConfig::default()
        })
        .unwrap();
        assert_eq!(disabled.model_name(), "disabled");

        let ollama = create_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(ollama.model_name(), "llama3.2:3b");

        assert!(create_generator(&GenerationConfig {
            provider: "vllm".to_string(),
            ..GenerationConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_ollama_generator_trims_trailing_slash() {
        let generator = OllamaGenerator::new(&GenerationConfig {
            url: "http://localhost:11434/".to_string(),
            ..GenerationConfig::default()
        })
        .unwrap();
        assert_eq!(generator.url, "http://localhost:11434");
    }
}
