pub mod claude;
pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use claude::ClaudeProvider;
pub use gemini::GeminiProvider;
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use openai::{glm_provider, OpenAiCompatibleProvider};

use super::ProviderName;
use crate::types::LlmError;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Sends a provider request and decodes the JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: ProviderName,
    request: RequestBuilder,
) -> Result<T, LlmError> {
    let response = request.send().await.map_err(|e| transport_error(provider, e))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| transport_error(provider, e))?;

    if !status.is_success() {
        debug!("{} responded {}: {}", provider, status, body);
        return Err(status_error(provider, status, &body));
    }

    serde_json::from_str(&body).map_err(|e| LlmError::InvalidResponse {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn status_error(provider: ProviderName, status: StatusCode, body: &str) -> LlmError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited(provider.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::NotConfigured(provider.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => LlmError::Timeout(provider.to_string()),
        _ => LlmError::Upstream {
            provider: provider.to_string(),
            message: format!("HTTP {}: {}", status.as_u16(), crate::utils::text::truncate_chars(body, 200)),
        },
    }
}

pub(crate) fn transport_error(provider: ProviderName, err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(provider.to_string())
    } else {
        LlmError::Upstream {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

pub(crate) fn empty_response(provider: ProviderName) -> LlmError {
    LlmError::InvalidResponse {
        provider: provider.to_string(),
        message: "response carried no text".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_provider_statuses() {
        let p = ProviderName::Claude;
        assert_eq!(status_error(p, StatusCode::TOO_MANY_REQUESTS, ""), LlmError::RateLimited("claude".into()));
        assert_eq!(status_error(p, StatusCode::UNAUTHORIZED, ""), LlmError::NotConfigured("claude".into()));
        assert!(matches!(
            status_error(p, StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            LlmError::Upstream { .. }
        ));
    }
}
