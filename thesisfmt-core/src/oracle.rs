//! External paragraph classification over HTTP.
//!
//! The oracle only suggests group names, a batch of paragraphs per request.
//! Validating the answers and falling back to the rule-based result is the
//! classifier's job. The agent's timeout bounds every request.

use crate::config::{AiConfig, AiProvider};
use crate::docx::ParagraphInfo;
use crate::types::{Alignment, GroupKey};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Paragraph text sent to the provider is cut to this many characters
pub const MAX_PROMPT_TEXT_CHARS: usize = 1200;

/// Neighbouring paragraphs are cut shorter; they only give context
pub const MAX_CONTEXT_CHARS: usize = 120;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("AI classification is disabled")]
    Disabled,

    #[error("no API key configured for {0}")]
    MissingKey(String),

    #[error("AI provider unreachable: {0}")]
    Transport(String),

    #[error("AI provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("AI provider timed out")]
    Timeout,

    #[error("AI provider returned an unusable answer: {0}")]
    InvalidResponse(String),
}

/// What the oracle sees about one paragraph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRequest {
    #[serde(rename = "index")]
    pub ordinal: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_name: Option<String>,
    /// The rule-based answer
    #[serde(rename = "heuristic")]
    pub candidate: GroupKey,
    pub alignment: Alignment,
    pub is_numbered: bool,
    pub prev_text: String,
    pub next_text: String,
}

impl OracleRequest {
    pub fn new(ordinal: usize, text: &str, style_name: Option<&str>, candidate: GroupKey) -> Self {
        Self {
            ordinal,
            text: truncate(text, MAX_PROMPT_TEXT_CHARS),
            style_name: style_name.map(str::to_string),
            candidate,
            alignment: Alignment::Left,
            is_numbered: false,
            prev_text: String::new(),
            next_text: String::new(),
        }
    }

    pub fn from_paragraph(paragraph: &ParagraphInfo, candidate: GroupKey) -> Self {
        Self {
            alignment: paragraph.alignment,
            is_numbered: paragraph.is_numbered,
            ..Self::new(
                paragraph.ordinal,
                &paragraph.text,
                paragraph.style_name.as_deref(),
                candidate,
            )
        }
    }

    pub fn with_neighbours(mut self, prev: Option<&str>, next: Option<&str>) -> Self {
        self.prev_text = prev.map(|t| truncate(t, MAX_CONTEXT_CHARS)).unwrap_or_default();
        self.next_text = next.map(|t| truncate(t, MAX_CONTEXT_CHARS)).unwrap_or_default();
        self
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

/// System and user prompt for one batch. Every index must come back labelled.
pub fn batch_prompt(batch: &[OracleRequest]) -> (String, String) {
    let keys: Vec<&str> = GroupKey::ALL.iter().map(|k| k.as_str()).collect();
    let indices: Vec<String> = batch.iter().map(|r| r.ordinal.to_string()).collect();
    let system = format!(
        "You classify paragraphs of an academic thesis into formatting groups.\n\
         Allowed groups: {}.\n\
         Return exactly one label for every index: {}.\n\
         Each row carries the rule-based guess as \"heuristic\"; answer body when unsure.\n\
         Reply with JSON only: {{\"labels\": [{{\"index\": 12, \"group\": \"body\"}}]}}",
        keys.join(", "),
        indices.join(", ")
    );
    let rows = serde_json::to_string(batch).unwrap_or_else(|_| "[]".to_string());
    (system, format!("Classify these paragraphs:\n{}", rows))
}

/// Suggests groups for paragraphs. Answers are untrusted text.
pub trait GroupOracle: Send + Sync {
    /// Labels keyed by paragraph ordinal. Paragraphs the provider skipped
    /// are absent from the map rather than an error.
    fn suggest_batch(
        &self,
        batch: &[OracleRequest],
    ) -> Result<BTreeMap<usize, String>, OracleError>;

    fn suggest(&self, request: &OracleRequest) -> Result<String, OracleError> {
        self.suggest_batch(std::slice::from_ref(request))?
            .remove(&request.ordinal)
            .ok_or_else(|| {
                OracleError::InvalidResponse(format!("no label for paragraph {}", request.ordinal))
            })
    }

    fn name(&self) -> &str;
}

/// Oracle for deployments without AI; every call reports `Disabled`
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledOracle;

impl GroupOracle for DisabledOracle {
    fn suggest_batch(
        &self,
        _batch: &[OracleRequest],
    ) -> Result<BTreeMap<usize, String>, OracleError> {
        Err(OracleError::Disabled)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    OpenAi,
    Gemini,
}

/// OpenAI chat-completions or Gemini generateContent over a blocking agent
pub struct HttpGroupOracle {
    agent: ureq::Agent,
    provider: Provider,
    api_key: String,
    model: String,
    url: String,
}

impl HttpGroupOracle {
    /// Pick the provider from config; `auto` prefers OpenAI when its key is set
    pub fn from_config(config: &AiConfig) -> Result<Self, OracleError> {
        let openai_key = config.openai_api_key.clone().filter(|k| !k.trim().is_empty());
        let gemini_key = config.gemini_api_key.clone().filter(|k| !k.trim().is_empty());

        let (provider, api_key) = match config.provider {
            AiProvider::Off => return Err(OracleError::Disabled),
            AiProvider::OpenAi => (
                Provider::OpenAi,
                openai_key.ok_or_else(|| OracleError::MissingKey("openai".to_string()))?,
            ),
            AiProvider::Gemini => (
                Provider::Gemini,
                gemini_key.ok_or_else(|| OracleError::MissingKey("gemini".to_string()))?,
            ),
            AiProvider::Auto => match (openai_key, gemini_key) {
                (Some(key), _) => (Provider::OpenAi, key),
                (None, Some(key)) => (Provider::Gemini, key),
                (None, None) => return Err(OracleError::MissingKey("auto".to_string())),
            },
        };

        let (model, url) = match provider {
            Provider::OpenAi => (config.openai_model.clone(), config.openai_url.clone()),
            Provider::Gemini => (
                config.gemini_model.clone(),
                format!(
                    "{}/{}:generateContent",
                    config.gemini_url.trim_end_matches('/'),
                    config.gemini_model
                ),
            ),
        };

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build();

        Ok(Self {
            agent,
            provider,
            api_key,
            model,
            url,
        })
    }

    fn call(&self, system: &str, user: &str) -> Result<Value, OracleError> {
        let result = match self.provider {
            Provider::OpenAi => self
                .agent
                .post(&self.url)
                .set("Authorization", &format!("Bearer {}", self.api_key))
                .set("Content-Type", "application/json")
                .send_json(json!({
                    "model": self.model,
                    "temperature": 0,
                    "response_format": {"type": "json_object"},
                    "messages": [
                        {"role": "system", "content": system},
                        {"role": "user", "content": user},
                    ],
                })),
            Provider::Gemini => self
                .agent
                .post(&self.url)
                .query("key", &self.api_key)
                .set("Content-Type", "application/json")
                .send_json(json!({
                    "contents": [{"parts": [{"text": format!("{}\n\n{}", system, user)}]}],
                    "generationConfig": {"temperature": 0},
                })),
        };

        let response = result.map_err(map_http_error)?;
        response
            .into_json::<Value>()
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))
    }

    fn content_of(&self, body: &Value) -> Option<String> {
        let text = match self.provider {
            Provider::OpenAi => body.pointer("/choices/0/message/content"),
            Provider::Gemini => body.pointer("/candidates/0/content/parts/0/text"),
        };
        text.and_then(Value::as_str).map(str::to_string)
    }
}

impl GroupOracle for HttpGroupOracle {
    fn suggest_batch(
        &self,
        batch: &[OracleRequest],
    ) -> Result<BTreeMap<usize, String>, OracleError> {
        if batch.is_empty() {
            return Ok(BTreeMap::new());
        }
        let (system, user) = batch_prompt(batch);
        let body = self.call(&system, &user)?;
        let content = self
            .content_of(&body)
            .ok_or_else(|| OracleError::InvalidResponse("missing message content".to_string()))?;
        let labels = extract_labels(&content)?;
        debug!(
            provider = self.name(),
            requested = batch.len(),
            labelled = labels.len(),
            "oracle answered"
        );
        Ok(labels)
    }

    fn name(&self) -> &str {
        match self.provider {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        }
    }
}

fn map_http_error(error: ureq::Error) -> OracleError {
    match error {
        ureq::Error::Status(status, _) => {
            let message = match status {
                401 | 403 => "invalid or unauthorized API key",
                429 => "rate limited, try again later",
                500..=599 => "provider temporarily unavailable",
                _ => "request rejected",
            };
            OracleError::Status {
                status,
                message: message.to_string(),
            }
        }
        ureq::Error::Transport(transport) => {
            let io_timeout = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<io::Error>())
                .map(|e| matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
                .unwrap_or(false);
            let text = transport.to_string();
            if io_timeout || text.contains("timed out") || text.contains("timeout") {
                OracleError::Timeout
            } else {
                OracleError::Transport(text)
            }
        }
    }
}

/// Pull `index -> group` labels out of a model answer. Accepts
/// `{"labels": [...]}` or a bare array, in a code fence or surrounded by
/// prose. Rows without an integer index or a string group are dropped.
pub fn extract_labels(content: &str) -> Result<BTreeMap<usize, String>, OracleError> {
    let payload = json_payload(content)?;
    let rows = match &payload {
        Value::Array(rows) => rows,
        Value::Object(map) => match map.get("labels") {
            Some(Value::Array(rows)) => rows,
            _ => return Err(OracleError::InvalidResponse("no \"labels\" array".to_string())),
        },
        _ => return Err(OracleError::InvalidResponse("answer is not a JSON object".to_string())),
    };

    Ok(rows
        .iter()
        .filter_map(|row| {
            let index = row.get("index")?.as_u64()?;
            let group = row.get("group")?.as_str()?;
            Some((index as usize, group.trim().to_string()))
        })
        .collect())
}

fn json_payload(content: &str) -> Result<Value, OracleError> {
    let mut trimmed = content.trim();
    if trimmed.starts_with("```") {
        trimmed = trimmed.trim_matches('`').trim();
        if let Some(rest) = trimmed.strip_prefix("json").or_else(|| trimmed.strip_prefix("JSON")) {
            trimmed = rest.trim();
        }
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }
    Err(OracleError::InvalidResponse(format!(
        "answer is not JSON: '{}'",
        truncate(content, MAX_CONTEXT_CHARS)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_labels_variants() {
        let labels =
            extract_labels(r#"{"labels": [{"index": 0, "group": "toc"}, {"index": 3, "group": "body"}]}"#)
                .unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&0], "toc");
        assert_eq!(labels[&3], "body");

        let fenced = "```json\n{\"labels\": [{\"index\": 7, \"group\": \"chapter_title\"}]}\n```";
        assert_eq!(extract_labels(fenced).unwrap()[&7], "chapter_title");

        let prose = "Sure! [{\"index\": 1, \"group\": \"figure_caption\"}] Hope that helps.";
        assert_eq!(extract_labels(prose).unwrap()[&1], "figure_caption");

        // Malformed rows are dropped, not fatal
        let partial = r#"{"labels": [{"index": "x", "group": "body"}, {"index": 2}, {"index": 4, "group": "toc"}]}"#;
        assert_eq!(extract_labels(partial).unwrap().keys().collect::<Vec<_>>(), vec![&4]);

        assert!(extract_labels("I am not sure about this one").is_err());
        assert!(extract_labels(r#"{"group": "body"}"#).is_err());
    }

    #[test]
    fn test_batch_prompt_carries_context() {
        let long = "字".repeat(MAX_PROMPT_TEXT_CHARS + 50);
        let request = OracleRequest::new(3, &long, Some("Normal"), GroupKey::Body)
            .with_neighbours(Some(&"前".repeat(500)), None);
        assert_eq!(request.text.chars().count(), MAX_PROMPT_TEXT_CHARS);
        assert_eq!(request.prev_text.chars().count(), MAX_CONTEXT_CHARS);

        let other = OracleRequest::new(4, "Figure 2 Results", None, GroupKey::FigureCaption);
        let (system, user) = batch_prompt(&[request, other]);
        assert!(system.contains("subsection_title"));
        assert!(system.contains("every index: 3, 4"));
        assert!(user.contains("\"heuristic\":\"figure_caption\""));
        assert!(user.contains("\"index\":4"));
    }

    #[test]
    fn test_hung_provider_hits_agent_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            // Accept and hold the connection without ever answering
            if let Ok((stream, _)) = listener.accept() {
                std::thread::sleep(Duration::from_secs(5));
                drop(stream);
            }
        });

        let config = AiConfig {
            provider: AiProvider::OpenAi,
            openai_api_key: Some("sk-test".to_string()),
            openai_url: format!("http://127.0.0.1:{}/v1/chat/completions", port),
            timeout_secs: 1,
            ..AiConfig::default()
        };
        let oracle = HttpGroupOracle::from_config(&config).unwrap();
        let request = OracleRequest::new(0, "Chapter 1 Introduction", None, GroupKey::ChapterTitle);

        let started = std::time::Instant::now();
        assert_eq!(oracle.suggest(&request), Err(OracleError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_provider_selection() {
        let mut config = AiConfig::default();
        assert_eq!(HttpGroupOracle::from_config(&config).err(), Some(OracleError::Disabled));

        config.provider = AiProvider::OpenAi;
        assert!(matches!(
            HttpGroupOracle::from_config(&config),
            Err(OracleError::MissingKey(_))
        ));

        config.provider = AiProvider::Auto;
        config.gemini_api_key = Some("g-key".to_string());
        let oracle = HttpGroupOracle::from_config(&config).unwrap();
        assert_eq!(oracle.name(), "gemini");
        assert!(oracle.url.ends_with("gemini-1.5-flash:generateContent"));

        config.openai_api_key = Some("sk-key".to_string());
        assert_eq!(HttpGroupOracle::from_config(&config).unwrap().name(), "openai");
    }

    #[test]
    fn test_disabled_oracle() {
        let request = OracleRequest::new(0, "text", None, GroupKey::Body);
        assert_eq!(DisabledOracle.suggest(&request), Err(OracleError::Disabled));
        assert_eq!(DisabledOracle.suggest_batch(&[request]), Err(OracleError::Disabled));
    }
}
