//! Shared HTTP plumbing for the network-backed providers
//!
//! Status codes are never treated as transport errors by the agent; every
//! response is classified here into the provider error taxonomy.

use crate::provider::{HealthStatus, ProviderError};
use std::time::Duration;

/// Fixed timeout for health probes
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Build an agent with a global timeout that hands back non-2xx responses
pub fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    config.into()
}

/// Map a non-success HTTP status to a provider error
pub fn classify_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> ProviderError {
    let detail = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, truncate(body, 200))
    };
    match status {
        401 | 403 => ProviderError::auth(detail),
        400 | 404 | 422 => ProviderError::invalid(detail),
        429 => ProviderError::RateLimited { retry_after_secs },
        _ => ProviderError::unavailable(detail),
    }
}

/// Map a transport-level failure to a provider error
pub fn classify_transport(error: &ureq::Error, timeout: Duration) -> ProviderError {
    match error {
        ureq::Error::Timeout(_) => ProviderError::timeout(timeout),
        ureq::Error::StatusCode(code) => classify_status(*code, None, ""),
        other => ProviderError::unavailable(other.to_string()),
    }
}

/// POST a JSON payload and return the parsed JSON body of a 2xx response
pub fn post_json(
    agent: &ureq::Agent,
    url: &str,
    authorization: &str,
    extra_headers: &[(&str, &str)],
    payload: &serde_json::Value,
    timeout: Duration,
) -> Result<serde_json::Value, ProviderError> {
    let mut request = agent
        .post(url)
        .header("Authorization", authorization)
        .header("Content-Type", "application/json");
    for (name, value) in extra_headers {
        request = request.header(*name, *value);
    }

    let mut response = request
        .send_json(payload)
        .map_err(|e| classify_transport(&e, timeout))?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.body_mut().read_to_string().unwrap_or_default();
        return Err(classify_status(status, retry_after, &body));
    }

    response
        .body_mut()
        .read_json::<serde_json::Value>()
        .map_err(|e| ProviderError::unavailable(format!("Malformed response body: {}", e)))
}

/// GET `url` with a short timeout and report health from the status code.
///
/// `healthy_codes` count as healthy, any other status is degraded, and a
/// transport failure is unhealthy.
pub fn probe(url: &str, authorization: Option<&str>, healthy_codes: &[u16]) -> HealthStatus {
    let agent = build_agent(HEALTH_TIMEOUT);
    let mut request = agent.get(url);
    if let Some(auth) = authorization {
        request = request.header("Authorization", auth);
    }

    match request.call() {
        Ok(response) => {
            let status = response.status().as_u16();
            if healthy_codes.contains(&status) {
                HealthStatus::Healthy
            } else {
                log::debug!("Health probe {} returned {}", url, status);
                HealthStatus::Degraded
            }
        }
        Err(e) => {
            log::debug!("Health probe {} failed: {}", url, e);
            HealthStatus::Unhealthy
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(401, None, ""),
            ProviderError::AuthError { .. }
        ));
        assert!(matches!(
            classify_status(403, None, ""),
            ProviderError::AuthError { .. }
        ));
        assert!(matches!(
            classify_status(422, None, "{\"detail\":\"bad size\"}"),
            ProviderError::InvalidRequest { .. }
        ));
        assert_eq!(
            classify_status(429, Some(30), ""),
            ProviderError::RateLimited {
                retry_after_secs: Some(30)
            }
        );
        assert!(matches!(
            classify_status(503, None, ""),
            ProviderError::ProviderUnavailable { .. }
        ));
    }

    #[test]
    fn test_classify_transport() {
        let err = classify_transport(&ureq::Error::ConnectionFailed, Duration::from_secs(5));
        assert!(matches!(err, ProviderError::ProviderUnavailable { .. }));
        let err = classify_transport(&ureq::Error::StatusCode(401), Duration::from_secs(5));
        assert!(matches!(err, ProviderError::AuthError { .. }));
    }

    #[test]
    fn test_error_detail_is_truncated() {
        let body = "x".repeat(500);
        let err = classify_status(500, None, &body);
        assert!(err.to_string().len() < 300);
    }
}
