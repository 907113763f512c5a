// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content enhancer backed by any OpenAI-compatible chat completions endpoint.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use umbruch_core::config::EnhancerConfig;
use umbruch_core::{Result, UmbruchError};
use umbruch_document::structure::SuggestedBoundary;

use super::{BoundaryAdvisor, ContentEnhancer, InferredMetadata};

/// Sampling temperature for every request.
const TEMPERATURE: f32 = 0.3;
/// Confidence given to suggested boundaries (0–1).
const SUGGESTION_CONFIDENCE: f32 = 0.7;
/// Prompts carry at most this many characters of document text.
const MAX_PROMPT_TEXT: usize = 3000;
/// Titles that carry no information on their own.
const GENERIC_TITLES: [&str; 3] = ["chapter", "section", "part"];

static BOUNDARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*Page\s*(\d+)\s*:\s*(.+?)\s*$").expect("valid boundary reply regex")
});

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Enhancer and boundary advisor speaking the chat completions protocol.
pub struct OpenAiCompatibleEnhancer {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiCompatibleEnhancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleEnhancer")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl OpenAiCompatibleEnhancer {
    /// Build the adapter from configuration.
    ///
    /// `Ok(None)` when no base URL is configured. The API key is read from
    /// the environment variable named in the configuration; endpoints that
    /// need none (local servers) work without it.
    pub fn from_config(config: &EnhancerConfig) -> Result<Option<Self>> {
        let Some(base_url) = config.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| UmbruchError::Config(format!("failed to create HTTP client: {}", e)))?;
        let api_key = std::env::var(&config.api_key_env).ok().filter(|key| !key.is_empty());
        if api_key.is_none() {
            debug!(variable = %config.api_key_env, "No API key set for the content enhancer");
        }
        Ok(Some(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn complete(&self, prompt: String, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: prompt,
            }],
            temperature: TEMPERATURE,
            max_tokens,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| UmbruchError::Enhancer(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Content enhancer returned an error status");
            return Err(UmbruchError::Enhancer(format!(
                "API error ({}): {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| UmbruchError::Enhancer(format!("failed to parse response: {}", e)))?;
        reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| UmbruchError::Enhancer("response carried no choices".into()))
    }
}

#[async_trait]
impl ContentEnhancer for OpenAiCompatibleEnhancer {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn infer_metadata(&self, sample: &str) -> Result<Option<InferredMetadata>> {
        let prompt = format!(
            "Identify the title, author, and language of the book this text comes from.\n\
             Reply with a JSON object with the keys \"title\", \"author\", and \"language\" \
             (a BCP 47 tag). Use null for anything you cannot tell.\n\nText:\n{}",
            truncate(sample)
        );
        let reply = self.complete(prompt, 200).await?;
        let Some(json) = extract_json_object(&reply) else {
            debug!("Metadata reply carried no JSON object");
            return Ok(None);
        };
        let inferred: InferredMetadata = serde_json::from_str(json)
            .map_err(|e| UmbruchError::Enhancer(format!("failed to parse metadata reply: {}", e)))?;
        let inferred = inferred.normalized();
        Ok((inferred != InferredMetadata::default()).then_some(inferred))
    }

    async fn refine_chapter_title(&self, excerpt: &str) -> Result<Option<String>> {
        let prompt = format!(
            "Give a concise title (at most eight words) for the chapter that begins with \
             the text below. Reply with the title only, or NONE.\n\n{}",
            truncate(excerpt)
        );
        let reply = self.complete(prompt, 40).await?;
        Ok(clean_title_reply(&reply))
    }

    async fn improve_text(&self, text: &str, confidence_hint: f32) -> Result<Option<String>> {
        let prompt = format!(
            "The following text was recognized from a scanned page with about {:.0}% \
             confidence. Correct recognition errors only; keep wording, language, and line \
             breaks. Reply with the corrected text only.\n\n{}",
            confidence_hint,
            truncate(text)
        );
        let reply = self.complete(prompt, 1000).await?;
        let reply = reply.trim();
        Ok((!reply.is_empty()).then(|| reply.to_string()))
    }
}

#[async_trait]
impl BoundaryAdvisor for OpenAiCompatibleEnhancer {
    async fn suggest_boundaries(&self, excerpt: &str) -> Result<Vec<SuggestedBoundary>> {
        let prompt = format!(
            "Analyze this document sample and identify chapter boundaries. Look for chapter \
             titles, section headings, or major topic changes.\n\nDocument sample:\n{}\n\n\
             Format your response as one line per chapter start:\nPage X: [Chapter Title]\n\
             Only return definite chapter starts, be conservative.",
            excerpt
        );
        let reply = self.complete(prompt, 500).await?;
        Ok(parse_boundary_reply(&reply))
    }
}

// -- Reply parsing ----------------------------------------------------------------

/// Parse `Page N: Title` lines. Page numbers are 1-based in the reply and
/// 0-based in the result. Generic or empty titles are dropped.
pub fn parse_boundary_reply(reply: &str) -> Vec<SuggestedBoundary> {
    reply
        .lines()
        .filter_map(|line| {
            let captures = BOUNDARY_LINE.captures(line)?;
            let page: usize = captures[1].parse().ok()?;
            let title = captures[2].trim_matches(|c: char| c == '[' || c == ']' || c == '"' || c.is_whitespace());
            if page == 0 || title.chars().count() < 3 || GENERIC_TITLES.contains(&title.to_lowercase().as_str()) {
                return None;
            }
            Some(SuggestedBoundary {
                page: page - 1,
                title: title.to_string(),
                confidence: SUGGESTION_CONFIDENCE,
            })
        })
        .collect()
}

/// The JSON object in a reply, with or without a code fence.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn clean_title_reply(reply: &str) -> Option<String> {
    let title = reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '#')
        .trim();
    if title.is_empty() || title.eq_ignore_ascii_case("none") || title.chars().count() > 120 {
        None
    } else {
        Some(title.to_string())
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_PROMPT_TEXT) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_reply_is_parsed_to_zero_based_pages() {
        let reply = "Here is what I found:\nPage 3: The Voyage Out\npage 12 : [Landfall]\nPage 0: Nothing\nPage 7: Chapter\n";
        let suggestions = parse_boundary_reply(reply);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].page, 2);
        assert_eq!(suggestions[0].title, "The Voyage Out");
        assert_eq!(suggestions[1].page, 11);
        assert_eq!(suggestions[1].title, "Landfall");
        assert!(suggestions.iter().all(|s| s.confidence == SUGGESTION_CONFIDENCE));
    }

    #[test]
    fn json_object_is_found_inside_a_code_fence() {
        let reply = "```json\n{\"title\": \"Mosses\", \"author\": null}\n```";
        let json = extract_json_object(reply).expect("json present");
        let parsed: InferredMetadata = serde_json::from_str(json).expect("valid json");
        assert_eq!(parsed.title.as_deref(), Some("Mosses"));
        assert_eq!(parsed.author, None);
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn title_reply_is_cleaned() {
        assert_eq!(clean_title_reply("\n\"The Northern Bogs\"\n").as_deref(), Some("The Northern Bogs"));
        assert_eq!(clean_title_reply("NONE"), None);
        assert_eq!(clean_title_reply("   "), None);
    }

    #[test]
    fn missing_base_url_disables_the_adapter() {
        let config = EnhancerConfig::default();
        assert!(OpenAiCompatibleEnhancer::from_config(&config).expect("config").is_none());
    }

    #[test]
    fn endpoint_is_derived_from_base_url() {
        let config = EnhancerConfig {
            base_url: Some("http://localhost:8080/v1/".into()),
            ..EnhancerConfig::default()
        };
        let enhancer = OpenAiCompatibleEnhancer::from_config(&config)
            .expect("config")
            .expect("adapter enabled");
        assert_eq!(enhancer.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn request_body_matches_chat_completions_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "hello".into(),
            }],
            temperature: TEMPERATURE,
            max_tokens: 40,
        };
        let value = serde_json::to_value(&request).expect("serializable");
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 40);
        assert!((value["temperature"].as_f64().unwrap_or_default() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "字".repeat(MAX_PROMPT_TEXT + 10);
        assert_eq!(truncate(&text).chars().count(), MAX_PROMPT_TEXT);
    }
}
