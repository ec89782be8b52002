//! JSON-over-HTTP calls to external model services with retry.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry

use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;

use crate::retry::{self, permanent, RetryPolicy};

pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Whether a non-success status is worth retrying.
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// POST `body` to `url` and return the decoded JSON response.
///
/// `service` names the backend in errors and logs (e.g. `"OpenAI"`).
pub async fn post_json(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    policy: &RetryPolicy,
) -> Result<serde_json::Value> {
    let what = format!("{} request", service);
    let value = retry::attempt(policy, &what, |_| async move {
        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{} connection error ({}): {}", service, url, e))?;
        let status = response.status();

        if status.is_success() {
            let json: serde_json::Value = response.json().await?;
            return Ok(json);
        }

        let body_text = response.text().await.unwrap_or_default();
        let err = anyhow::anyhow!("{} API error {}: {}", service, status, body_text);
        if is_retryable(status) {
            Err(err)
        } else {
            Err(permanent(err))
        }
    })
    .await?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_unreachable_host_exhausts_policy() {
        let client = client(1).unwrap();
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1));
        let err = post_json(
            &client,
            "Test",
            "http://127.0.0.1:9/unreachable",
            None,
            &serde_json::json!({}),
            &policy,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("after 2 attempt(s)"));
    }
}
