//! HTTP plumbing shared by the hosted and local generation backends.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{Result, TabletalkError};

/// Builds a client with no global deadline; each request carries its own.
pub(crate) fn client() -> Result<Client> {
    Client::builder()
        .build()
        .map_err(|e| TabletalkError::config(format!("Cannot build HTTP client: {e}")))
}

/// Sends `request` with a deadline and decodes the JSON body of a success
/// reply. Every failure is a generation failure attributed to `backend`.
pub(crate) async fn send_json<T: DeserializeOwned>(
    backend: &str,
    request: RequestBuilder,
    timeout: Duration,
) -> Result<T> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| transport_error(backend, timeout, &e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(backend, timeout, &e))?;

    if !status.is_success() {
        return Err(status_error(backend, status, &body));
    }

    serde_json::from_str(&body).map_err(|e| {
        TabletalkError::generation(format!("{backend} sent a reply that is not a completion: {e}"))
    })
}

fn transport_error(backend: &str, timeout: Duration, error: &reqwest::Error) -> TabletalkError {
    if error.is_timeout() {
        TabletalkError::generation(format!(
            "No answer from {backend} within {:.1} seconds",
            timeout.as_secs_f64()
        ))
    } else {
        TabletalkError::generation(format!("{backend} request failed: {error}"))
    }
}

/// Maps a non-success reply, preferring the error text the backend sends.
///
/// OpenAI-style bodies nest it as `{"error": {"message": ...}}`; Ollama sends
/// `{"error": "..."}`.
fn status_error(backend: &str, status: StatusCode, body: &str) -> TabletalkError {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return TabletalkError::generation(format!("{backend} refused the API key ({status})"));
    }

    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            let error = json.get("error")?;
            error
                .get("message")
                .unwrap_or(error)
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());

    if detail.is_empty() {
        TabletalkError::generation(format!("{backend} answered {status}"))
    } else {
        TabletalkError::generation(format!("{backend} answered {status}: {detail}"))
    }
}

/// A missing or blank answer is a generation failure, not an empty query.
pub(crate) fn require_answer(backend: &str, content: Option<String>) -> Result<String> {
    content
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| TabletalkError::generation(format!("{backend} returned an empty answer")))
}
