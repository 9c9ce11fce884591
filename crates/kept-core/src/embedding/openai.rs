//! OpenAI-compatible embeddings client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{Embedder, EmbeddingError, EmbeddingResult};
use crate::util::{compact_text, is_http_url, normalize_text_option};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Calls `POST {base_url}/embeddings` with a bearer API key
#[derive(Clone)]
pub struct OpenAiEmbedder {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OpenAiEmbedder")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> EmbeddingResult<Self> {
        let api_key = normalize_text_option(Some(api_key.into())).ok_or_else(|| {
            EmbeddingError::InvalidConfiguration("API key must not be empty".to_string())
        })?;
        let model = normalize_text_option(Some(model.into()))
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

        Ok(Self {
            endpoint: normalize_endpoint(base_url.into())?,
            api_key,
            model,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(parse_api_error(status, &body)));
        }

        let payload = response.json::<EmbeddingResponse>().await?;
        payload.into_vector()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_vector(self) -> EmbeddingResult<Vec<f32>> {
        self.data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| {
                EmbeddingError::InvalidPayload("response did not include an embedding".to_string())
            })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.and_then(|error| error.message) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> EmbeddingResult<String> {
    let base = normalize_text_option(Some(raw)).ok_or_else(|| {
        EmbeddingError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if !is_http_url(&base) {
        return Err(EmbeddingError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ));
    }
    Ok(format!("{}/embeddings", base.trim_end_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_appends_embeddings_path() {
        assert_eq!(
            normalize_endpoint("https://api.openai.com/v1/".to_string()).unwrap(),
            "https://api.openai.com/v1/embeddings"
        );
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.openai.com".to_string()).is_err());
    }

    #[test]
    fn new_rejects_blank_key_and_defaults_model() {
        let err = OpenAiEmbedder::new(
            "  ",
            "https://api.openai.com/v1",
            "",
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidConfiguration(_)));

        let embedder = OpenAiEmbedder::new(
            "sk-test",
            "https://api.openai.com/v1",
            " ",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(embedder.model(), DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn debug_redacts_api_key() {
        let embedder = OpenAiEmbedder::new(
            "sk-secret",
            "https://api.openai.com/v1",
            "text-embedding-3-small",
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{embedder:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn response_yields_first_embedding() {
        let payload: EmbeddingResponse = serde_json::from_str(
            r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.25]}]}"#,
        )
        .unwrap();
        assert_eq!(payload.into_vector().unwrap(), vec![0.5, -0.25]);

        let empty: EmbeddingResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(matches!(
            empty.into_vector(),
            Err(EmbeddingError::InvalidPayload(_))
        ));
    }

    #[test]
    fn parse_api_error_prefers_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(
            parse_api_error(StatusCode::UNAUTHORIZED, body),
            "Incorrect API key provided (401)"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, ""),
            "HTTP 502"
        );
    }
}
