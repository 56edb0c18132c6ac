//! Answer synthesis via an OpenAI-compatible chat-completions API.
//!
//! A single attempt per request, no internal retry: a failed generation is
//! surfaced immediately so the audit trail never records a masked failure
//! as success.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use docvault_core::models::Chunk;
use docvault_core::pipeline::AnswerSynthesizer;
use docvault_core::{Error, Result};

use crate::config::SynthesisConfig;

const SYSTEM_PROMPT: &str = "You are an assistant. Answer using only the provided context. \
If the information is not in the context, say that you do not know.";

/// Build the synthesizer when `[synthesis]` is enabled, `None` otherwise.
pub fn create_synthesizer(config: &SynthesisConfig) -> Result<Option<Arc<dyn AnswerSynthesizer>>> {
    if !config.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(ChatCompletionSynthesizer::new(config)?)))
}

/// Chat-completions client for answer synthesis.
pub struct ChatCompletionSynthesizer {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl ChatCompletionSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| Error::validation("synthesis.base_url is required"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::validation("synthesis.model is required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::DependencyUnavailable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }
}

/// One context line per chunk, tagged with its source title.
fn build_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("[Source: {}] {}", chunk.source_title, chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl AnswerSynthesizer for ChatCompletionSynthesizer {
    async fn generate(&self, question: &str, chunks: &[Chunk]) -> Result<String> {
        let user_prompt = format!(
            "Question: {}\n\nContext:\n{}",
            question,
            build_context(chunks)
        );
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt},
            ],
        });

        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if !api_key.is_empty() {
            request = request.bearer_auth(&api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("language model request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::DependencyUnavailable(format!(
                "language model returned {}",
                status
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::DependencyUnavailable(e.to_string()))?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| Error::DependencyUnavailable("empty completion response".to_string()))?;
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(title: &str, content: &str) -> Chunk {
        Chunk {
            id: "c1".to_string(),
            document_id: "d1".to_string(),
            workspace_id: "ws-1".to_string(),
            content: content.to_string(),
            start_char: 0,
            end_char: content.len() as i64,
            chunk_index: 0,
            source_title: title.to_string(),
            source_url: None,
        }
    }

    #[test]
    fn test_context_tags_sources() {
        let context = build_context(&[
            chunk("Alpha", "first passage"),
            chunk("Beta", "second passage"),
        ]);
        assert_eq!(
            context,
            "[Source: Alpha] first passage\n\n[Source: Beta] second passage"
        );
    }

    #[test]
    fn test_disabled_config_yields_none() {
        let config = SynthesisConfig::default();
        assert!(create_synthesizer(&config).unwrap().is_none());
    }
}
