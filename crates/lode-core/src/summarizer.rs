//! Summarization backends for insight extraction.
//!
//! Both backends share one contract: take a slab of transcript text
//! plus the titles of gems already found, return structured gems and
//! an "incomplete" flag meaning the conversation looks mid-thought.
//! They differ only in how they reach a model.

use crate::{LodeError, Result};
use async_trait::async_trait;
use lode_types::Gem;
use serde::{Deserialize, Serialize};

/// Result of one summarization call.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub gems: Vec<Gem>,
    /// The batch ends mid-thought; hold these gems for merging with
    /// the next chunk instead of finalizing them.
    pub incomplete: bool,
}

/// A pluggable insight-extraction backend.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Extract gems from session text. `existing_gems` carries the
    /// titles already finalized so the backend can avoid repeats.
    async fn extract(
        &self,
        session_text: &str,
        diff: &str,
        existing_gems: &[Gem],
    ) -> Result<Extraction>;

    /// Identifier stamped onto each extracted gem's `model` field.
    fn model_name(&self) -> &str;
}

/// Backend that talks to a local model server (Ollama-compatible
/// `/api/generate` endpoint).
pub struct LocalSummarizer {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl LocalSummarizer {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Summarizer for LocalSummarizer {
    async fn extract(
        &self,
        session_text: &str,
        diff: &str,
        existing_gems: &[Gem],
    ) -> Result<Extraction> {
        let prompt = build_prompt(session_text, diff, existing_gems);
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));

        let request = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LodeError::Summarizer(format!("local backend request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LodeError::Summarizer(format!(
                "local backend error ({status}): {body}"
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LodeError::Summarizer(format!("invalid local backend response: {e}")))?;

        parse_extraction(&body.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Backend that talks to a hosted Anthropic-style messages API.
pub struct HostedSummarizer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct HostedMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct HostedRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<HostedMessage<'a>>,
}

#[derive(Deserialize)]
struct HostedResponse {
    content: Vec<HostedContentBlock>,
}

#[derive(Deserialize)]
struct HostedContentBlock {
    text: Option<String>,
}

impl HostedSummarizer {
    /// Build a hosted backend. Falls back to `ANTHROPIC_API_KEY` when
    /// no key is configured.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let api_key = api_key
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                LodeError::Config(
                    "hosted extraction backend requires an API key \
                     (set extraction.api_key or ANTHROPIC_API_KEY)"
                        .to_string(),
                )
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Summarizer for HostedSummarizer {
    async fn extract(
        &self,
        session_text: &str,
        diff: &str,
        existing_gems: &[Gem],
    ) -> Result<Extraction> {
        let prompt = build_prompt(session_text, diff, existing_gems);
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let request = HostedRequest {
            model: &self.model,
            max_tokens: 2048,
            messages: vec![HostedMessage {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LodeError::Summarizer(format!("hosted backend request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LodeError::Summarizer(format!(
                "hosted backend error ({status}): {body}"
            )));
        }

        let body: HostedResponse = response
            .json()
            .await
            .map_err(|e| LodeError::Summarizer(format!("invalid hosted backend response: {e}")))?;

        let text = body
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        parse_extraction(&text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Build the shared extraction prompt.
fn build_prompt(session_text: &str, diff: &str, existing_gems: &[Gem]) -> String {
    let mut prompt = String::from(
        "You are mining a coding-assistant terminal session for durable insights.\n\
         Extract \"gems\": decisions made, discoveries about the codebase, gotchas hit,\n\
         patterns established, open issues, and important context.\n\n\
         Respond with ONLY a JSON object in this exact shape:\n\
         {\n\
           \"gems\": [\n\
             {\"type\": \"decision|discovery|gotcha|pattern|issue|context\",\n\
              \"title\": \"short title\",\n\
              \"summary\": \"one sentence\",\n\
              \"tags\": [\"tag\"],\n\
              \"files\": [\"path\"],\n\
              \"content\": {}}\n\
           ],\n\
           \"incomplete\": false\n\
         }\n\n\
         Set \"incomplete\" to true if the transcript ends mid-thought and the\n\
         gems may change once you see more. Do not repeat insights already known.\n",
    );

    if !existing_gems.is_empty() {
        prompt.push_str("\nAlready known:\n");
        for gem in existing_gems {
            prompt.push_str(&format!("- {}\n", gem.title));
        }
    }

    if !diff.is_empty() {
        prompt.push_str("\nUncommitted changes:\n");
        prompt.push_str(diff);
        prompt.push('\n');
    }

    prompt.push_str("\nTranscript:\n");
    prompt.push_str(session_text);
    prompt
}

#[derive(Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    gems: Vec<Gem>,
    #[serde(default)]
    incomplete: bool,
}

/// Parse a backend's text response into an extraction.
///
/// Models often wrap JSON in fenced code blocks or preamble; find the
/// outermost object rather than requiring a bare document.
fn parse_extraction(text: &str) -> Result<Extraction> {
    let start = text
        .find('{')
        .ok_or_else(|| LodeError::Summarizer("no JSON object in backend response".to_string()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| LodeError::Summarizer("unterminated JSON in backend response".to_string()))?;

    let payload: ExtractionPayload = serde_json::from_str(&text[start..=end])
        .map_err(|e| LodeError::Summarizer(format!("malformed backend JSON: {e}")))?;

    Ok(Extraction {
        gems: payload.gems,
        incomplete: payload.incomplete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_types::GemType;

    #[test]
    fn parses_bare_json() {
        let text = r#"{"gems": [{"type": "gotcha", "title": "Tests need the db feature",
            "summary": "Unit tests fail without it."}], "incomplete": false}"#;
        let extraction = parse_extraction(text).unwrap();
        assert_eq!(extraction.gems.len(), 1);
        assert_eq!(extraction.gems[0].gem_type, GemType::Gotcha);
        assert!(!extraction.incomplete);
    }

    #[test]
    fn parses_fenced_json_with_preamble() {
        let text = "Here are the insights:\n```json\n{\"gems\": [], \"incomplete\": true}\n```\n";
        let extraction = parse_extraction(text).unwrap();
        assert!(extraction.gems.is_empty());
        assert!(extraction.incomplete);
    }

    #[test]
    fn rejects_non_json_response() {
        assert!(parse_extraction("I could not find any insights.").is_err());
    }

    #[test]
    fn prompt_lists_known_titles() {
        let mut gem = Gem::default();
        gem.title = "Use WAL mode".to_string();
        let prompt = build_prompt("text", "", &[gem]);
        assert!(prompt.contains("- Use WAL mode"));
    }
}
