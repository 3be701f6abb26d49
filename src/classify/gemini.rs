use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::backend::{ClassificationError, Classifier, ImageData};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const MAX_ERROR_BODY: usize = 512;

/// Configuration for the remote classifier.
#[derive(Clone)]
pub struct ClassifierConfig {
    /// REST base URL, or "stub://<label>" for a fixed local answer.
    pub endpoint: String,
    pub model: String,
    /// Only ever sourced from the environment.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for ClassifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Gemini `generateContent` client.
pub struct GeminiClassifier {
    agent: ureq::Agent,
    url: String,
    api_key: String,
}

impl GeminiClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("GEMINI_API_KEY must be set to use the Gemini classifier"))?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        let url = format!(
            "{}/models/{}:generateContent",
            config.endpoint.trim_end_matches('/'),
            config.model
        );
        Ok(Self {
            agent,
            url,
            api_key,
        })
    }

    fn request_body(image: &ImageData, instruction: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text {
                        text: instruction.to_string(),
                    },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type.to_string(),
                            data: STANDARD.encode(&image.bytes),
                        },
                    },
                ],
            }],
        }
    }
}

impl Classifier for GeminiClassifier {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn classify(&self, image: &ImageData, instruction: &str) -> Result<String, ClassificationError> {
        let body = serde_json::to_string(&Self::request_body(image, instruction))
            .map_err(|e| ClassificationError::MalformedResponse(format!("encode request: {e}")))?;

        let response = match self
            .agent
            .post(&self.url)
            .query("key", &self.api_key)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(ClassificationError::Api {
                    status,
                    body: truncate_error_body(body),
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(ClassificationError::Transport(transport.to_string()));
            }
        };

        let raw = response
            .into_string()
            .map_err(|e| ClassificationError::Transport(e.to_string()))?;
        parse_response_text(&raw)
    }
}

/// Cap an error body at `MAX_ERROR_BODY` characters.
fn truncate_error_body(mut body: String) -> String {
    if let Some((cut, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
        body.truncate(cut);
    }
    body
}

/// Extract the answer text from a `generateContent` response body.
pub(crate) fn parse_response_text(raw: &str) -> Result<String, ClassificationError> {
    let parsed: GenerateResponse = serde_json::from_str(raw)
        .map_err(|e| ClassificationError::MalformedResponse(e.to_string()))?;
    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ClassificationError::MalformedResponse("no candidates".to_string()))?;
    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect();
    if text.trim().is_empty() {
        return Err(ClassificationError::MalformedResponse(
            "candidate carried no text".to_string(),
        ));
    }
    Ok(text)
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_api_key() {
        let err = GeminiClassifier::new(&ClassifierConfig::default())
            .err()
            .expect("missing key must fail");
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn request_carries_instruction_and_inline_image() {
        let image = ImageData::new(vec![0x89, b'P', b'N', b'G'], "image/png");
        let body = serde_json::to_value(GeminiClassifier::request_body(&image, "label it")).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "label it");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "iVBORw==");
    }

    #[test]
    fn parses_candidate_text() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Non-Biodegradable\n"}],"role":"model"}}]}"#;
        assert_eq!(parse_response_text(raw).unwrap(), "Non-Biodegradable\n");
    }

    #[test]
    fn rejects_responses_without_text() {
        for raw in [
            "not json",
            r#"{"candidates":[]}"#,
            r#"{"candidates":[{"finishReason":"SAFETY"}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#,
        ] {
            assert!(matches!(
                parse_response_text(raw),
                Err(ClassificationError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn error_body_is_cut_on_a_char_boundary() {
        let body = format!("{}é tail", "a".repeat(MAX_ERROR_BODY - 1));
        let cut = truncate_error_body(body);
        assert_eq!(cut.chars().count(), MAX_ERROR_BODY);
        assert!(cut.ends_with('é'));

        assert_eq!(truncate_error_body("short".to_string()), "short");
    }

    #[test]
    fn debug_output_redacts_key() {
        let config = ClassifierConfig {
            api_key: Some("secret-key".to_string()),
            ..ClassifierConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
