use crate::gateway::error::{GatewayError, GatewayResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Authentication attached to an outbound gateway request
pub enum RequestAuth<'a> {
    None,
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

/// Request body shapes the gateway surface needs
pub enum RequestBody<'a> {
    Empty,
    Json(&'a JsonValue),
    Form(&'a [(&'a str, &'a str)]),
}

#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Issue a request and decode the JSON response, retrying with
    /// exponential backoff on 429 and server errors.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: RequestAuth<'_>,
        body: RequestBody<'_>,
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            match &auth {
                RequestAuth::None => {}
                RequestAuth::Bearer(token) => {
                    request = request.bearer_auth(token);
                }
                RequestAuth::Basic { username, password } => {
                    request = request.basic_auth(username, Some(password));
                }
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            match &body {
                RequestBody::Empty => {}
                RequestBody::Json(payload) => {
                    request = request.json(payload);
                }
                RequestBody::Form(fields) => {
                    request = request.form(fields);
                }
            }

            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::UnexpectedResponse {
                                message: format!("invalid gateway JSON response: {}", e),
                            }
                        });
                    }

                    if status.as_u16() == 401 {
                        return Err(GatewayError::AuthenticationFailed {
                            message: format!("HTTP 401: {}", text),
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimitError {
                            message: "gateway rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(classify_api_error(status.as_u16(), &text));
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NetworkError {
            message: "gateway request failed".to_string(),
        }))
    }
}

/// Map a non-success gateway response to a typed error, surfacing the
/// gateway's `issue` code when the error body carries one.
pub fn classify_api_error(status: u16, body: &str) -> GatewayError {
    let parsed: Option<JsonValue> = serde_json::from_str(body).ok();
    let issue = parsed
        .as_ref()
        .and_then(|v| v.get("details"))
        .and_then(|v| v.as_array())
        .and_then(|details| details.first())
        .and_then(|d| d.get("issue"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    if issue.as_deref() == Some("ORDER_ALREADY_CAPTURED") {
        let order_id = parsed
            .as_ref()
            .and_then(|v| v.get("details"))
            .and_then(|v| v.as_array())
            .and_then(|details| details.first())
            .and_then(|d| d.get("field"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        return GatewayError::OrderAlreadyCaptured { order_id };
    }

    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|m| format!("HTTP {}: {}", status, m))
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body));

    GatewayError::ApiError {
        message,
        issue,
        retryable: status >= 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_captured_issue_is_detected() {
        let body = r#"{
            "name": "UNPROCESSABLE_ENTITY",
            "message": "The requested action could not be performed.",
            "details": [{"issue": "ORDER_ALREADY_CAPTURED", "field": "ORDER-9"}]
        }"#;
        let error = classify_api_error(422, body);
        assert!(matches!(error, GatewayError::OrderAlreadyCaptured { .. }));
    }

    #[test]
    fn server_errors_are_retryable() {
        let error = classify_api_error(503, "upstream unavailable");
        match error {
            GatewayError::ApiError { retryable, .. } => assert!(retryable),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let error = classify_api_error(422, r#"{"message": "bad order"}"#);
        match error {
            GatewayError::ApiError {
                retryable, message, ..
            } => {
                assert!(!retryable);
                assert!(message.contains("bad order"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
