//! Google Gemini backend

use super::types::{LlmRequest, LlmResponse, Usage};
use super::{LlmError, LlmErrorKind, LlmService};
use crate::conversation::{Message, Role};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini `generateContent` client. The model comes from each request.
pub struct GeminiService {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiService {
    pub fn new(api_key: String, gateway: Option<&str>) -> Result<Self, LlmError> {
        let base_url = match gateway {
            Some(gw) => format!("{}/gemini", gw.trim_end_matches('/')),
            None => DEFAULT_BASE_URL.to_string(),
        };

        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {}", e.without_url())))?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn url_for(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let system_text = request
            .messages
            .iter()
            .filter(|m| m.is_system())
            .map(Message::content)
            .collect::<Vec<_>>()
            .join("\n\n");

        let system_instruction = (!system_text.is_empty()).then(|| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text: system_text }],
        });

        let contents = request
            .messages
            .iter()
            .filter_map(|msg| {
                let role = match msg.role() {
                    Role::System => return None,
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                Some(GeminiContent {
                    role: Some(role.to_string()),
                    parts: vec![GeminiPart {
                        text: msg.content().to_string(),
                    }],
                })
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        }
    }

    fn normalize_response(resp: GeminiResponse) -> Result<LlmResponse, LlmError> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::malformed("No candidates in response"))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        let usage = resp
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u64::from(u.prompt_token_count),
                output_tokens: u64::from(u.candidates_token_count),
            })
            .unwrap_or_default();

        Ok(LlmResponse { text, usage })
    }
}

/// Map an HTTP failure onto the retry taxonomy.
///
/// The API's own status string wins over the HTTP code when present.
fn classify(status: StatusCode, api_status: Option<&str>) -> LlmErrorKind {
    match api_status {
        Some("UNAVAILABLE" | "RESOURCE_EXHAUSTED" | "INTERNAL") => return LlmErrorKind::Unavailable,
        Some("DEADLINE_EXCEEDED") => return LlmErrorKind::Timeout,
        Some("PERMISSION_DENIED" | "UNAUTHENTICATED") => return LlmErrorKind::PermissionDenied,
        Some("NOT_FOUND") => return LlmErrorKind::NotFound,
        Some("INVALID_ARGUMENT" | "FAILED_PRECONDITION") => return LlmErrorKind::InvalidRequest,
        _ => {}
    }

    match status.as_u16() {
        401 | 403 => LlmErrorKind::PermissionDenied,
        404 => LlmErrorKind::NotFound,
        400 => LlmErrorKind::InvalidRequest,
        408 | 504 => LlmErrorKind::Timeout,
        429 | 500..=599 => LlmErrorKind::Unavailable,
        _ => LlmErrorKind::Unknown,
    }
}

#[async_trait]
impl LlmService for GeminiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let gemini_request = Self::translate_request(request);

        let response = self
            .client
            .post(self.url_for(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .timeout(request.timeout)
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::timeout(format!("Request timeout: {}", e.without_url()))
                } else if e.is_connect() {
                    LlmError::unavailable(format!("Connection failed: {}", e.without_url()))
                } else {
                    LlmError::unknown(format!("Request failed: {}", e.without_url()))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::timeout(format!("Response timeout: {}", e.without_url()))
            } else {
                LlmError::unavailable(format!("Failed to read response: {}", e.without_url()))
            }
        })?;

        if !status.is_success() {
            let parsed = serde_json::from_str::<GeminiErrorResponse>(&body).ok();
            let api_status = parsed.as_ref().and_then(|r| r.error.status.as_deref());
            let kind = classify(status, api_status);
            let message = parsed.as_ref().map_or(body.as_str(), |r| r.error.message.as_str());
            return Err(LlmError::new(
                kind,
                format!("{} HTTP {}: {}", request.model, status.as_u16(), message),
            ));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::malformed(format!("Failed to parse response: {e}")))?;

        Self::normalize_response(gemini_response)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    status: Option<String>,
}
