//! HTTP clients for external providers and their sync adapters.
//!
//! Shared plumbing lives here: retrying sends, response decoding and the
//! standard OAuth2 refresh-token exchange.

pub mod harvest;
pub mod hubspot;
pub mod sheets;

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::ProviderError;
use crate::sync::oauth::RefreshedTokens;

pub const USER_AGENT: &str = concat!("opsdash/", env!("CARGO_PKG_VERSION"));

/// Longest `Retry-After` a provider can make us wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

/// What `send_with_retry` does after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then send again.
    RetryIn(Duration),
    /// Hand the response or error back to the caller.
    Stop,
}

/// The parts of an attempt's result that retrying depends on.
#[derive(Debug, Clone, Copy)]
enum Attempt<'a> {
    Response {
        status: reqwest::StatusCode,
        retry_after: Option<&'a str>,
    },
    /// Timeouts and refused connections are transient; anything else
    /// (TLS, bad URL, body errors) is not.
    Transport { transient: bool },
}

impl RetryPolicy {
    fn decide(&self, attempt: u32, outcome: Attempt<'_>) -> RetryDecision {
        if attempt >= self.max_attempts.max(1) {
            return RetryDecision::Stop;
        }
        match outcome {
            Attempt::Response { status, retry_after } if is_retryable_status(status) => {
                let delay = retry_after
                    .and_then(parse_retry_after)
                    .unwrap_or_else(|| self.backoff(attempt));
                RetryDecision::RetryIn(delay)
            }
            Attempt::Transport { transient: true } => RetryDecision::RetryIn(self.backoff(attempt)),
            _ => RetryDecision::Stop,
        }
    }

    /// Exponential from `initial_backoff_ms`, capped, plus up to 150 ms of
    /// jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(base + jitter_ms())
    }
}

fn jitter_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()) % 150)
        .unwrap_or(0)
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// `Retry-After` as delta-seconds or an HTTP date, capped at
/// [`MAX_RETRY_AFTER`]. A date in the past means retry now.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    let wait = match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => {
            let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
            (at.with_timezone(&chrono::Utc) - chrono::Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        }
    };
    Some(wait.min(MAX_RETRY_AFTER))
}

/// Send a request, retrying 429, 408, 5xx and timeout/connect failures.
/// A `Retry-After` header wins over the computed backoff.
pub async fn send_with_retry(
    provider: &str,
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, ProviderError> {
    let mut attempt = 1;
    loop {
        // Streaming bodies cannot be replayed; send those once.
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(ProviderError::Http);
        };

        let result = cloned.send().await;
        let decision = match &result {
            Ok(response) => policy.decide(
                attempt,
                Attempt::Response {
                    status: response.status(),
                    retry_after: response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                },
            ),
            Err(err) => policy.decide(
                attempt,
                Attempt::Transport { transient: err.is_timeout() || err.is_connect() },
            ),
        };

        let RetryDecision::RetryIn(delay) = decision else {
            return result.map_err(ProviderError::Http);
        };
        let cause = match &result {
            Ok(response) => format!("status {}", response.status()),
            Err(err) => format!("transport error: {}", err),
        };
        log::warn!(
            "{} attempt {}/{} failed with {}, retrying in {:?}",
            provider,
            attempt,
            policy.max_attempts,
            cause,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Decode a JSON body, mapping error statuses to [`ProviderError`].
pub async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ProviderError::Unauthorized);
    }
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message: truncate(&body, 300),
        });
    }
    serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// OAuth app credentials used for refresh-token exchanges.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Standard OAuth2 `grant_type=refresh_token` exchange.
pub async fn exchange_refresh_token(
    http: &reqwest::Client,
    provider: &str,
    client: &OAuthClient,
    refresh_token: &str,
    policy: &RetryPolicy,
) -> Result<RefreshedTokens, ProviderError> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("client_id", client.client_id.as_str()),
        ("refresh_token", refresh_token),
    ];
    if let Some(secret) = client.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let response = send_with_retry(provider, http.post(&client.token_url).form(&form), policy).await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(map_refresh_error(status.as_u16(), &body));
    }

    let value: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))?;
    let access_token = value["access_token"]
        .as_str()
        .ok_or_else(|| ProviderError::RefreshFailed("No access_token in response".into()))?;

    Ok(RefreshedTokens {
        access_token: access_token.to_string(),
        refresh_token: value["refresh_token"].as_str().map(str::to_string),
        expires_in: value["expires_in"].as_u64(),
    })
}

fn map_refresh_error(status: u16, body: &str) -> ProviderError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("expired") || lowered.contains("revoked"))
    {
        return ProviderError::RefreshRevoked;
    }
    ProviderError::RefreshFailed(format!("HTTP {}: {}", status, truncate(body, 300)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, retry_after: Option<&str>) -> Attempt<'_> {
        Attempt::Response {
            status: reqwest::StatusCode::from_u16(code).unwrap(),
            retry_after,
        }
    }

    #[test]
    fn test_retry_after_wins_and_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, status(429, Some("120"))),
            RetryDecision::RetryIn(Duration::from_secs(30))
        );
        assert_eq!(
            policy.decide(1, status(503, Some(" 2 "))),
            RetryDecision::RetryIn(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_retry_after_accepts_http_dates() {
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), Some(Duration::ZERO));
        let soon = (chrono::Utc::now() + chrono::Duration::seconds(10)).to_rfc2822();
        let wait = parse_retry_after(&soon).unwrap();
        assert!(wait > Duration::from_secs(8) && wait <= Duration::from_secs(10), "{:?}", wait);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_unparseable_retry_after_falls_back_to_backoff() {
        let policy = RetryPolicy::default();
        match policy.decide(1, status(429, Some("later"))) {
            RetryDecision::RetryIn(d) => {
                assert!(d >= Duration::from_millis(250) && d < Duration::from_millis(400))
            }
            RetryDecision::Stop => panic!("429 should be retried"),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        let second = policy.backoff(2);
        assert!(second >= Duration::from_millis(500) && second < Duration::from_millis(650));
        let late = policy.backoff(10);
        assert!(late >= Duration::from_millis(2_000) && late < Duration::from_millis(2_150));
    }

    #[test]
    fn test_stops_on_success_client_errors_and_last_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(1, status(200, None)), RetryDecision::Stop);
        assert_eq!(policy.decide(1, status(404, None)), RetryDecision::Stop);
        assert_eq!(policy.decide(1, Attempt::Transport { transient: false }), RetryDecision::Stop);
        assert_eq!(policy.decide(3, status(502, Some("1"))), RetryDecision::Stop);
        assert_eq!(policy.decide(2, status(408, Some("1"))), RetryDecision::RetryIn(Duration::from_secs(1)));
        assert!(matches!(
            policy.decide(2, Attempt::Transport { transient: true }),
            RetryDecision::RetryIn(_)
        ));
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let policy = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };
        assert_eq!(policy.decide(1, status(500, None)), RetryDecision::Stop);
    }

    #[test]
    fn test_refresh_error_mapping() {
        assert!(matches!(
            map_refresh_error(400, r#"{"error":"invalid_grant"}"#),
            ProviderError::RefreshRevoked
        ));
        assert!(matches!(
            map_refresh_error(500, "oops"),
            ProviderError::RefreshFailed(_)
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 5), "hi");
    }
}
