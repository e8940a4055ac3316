use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;

use crate::config::HttpSettings;
use crate::error::IoFailure;

pub struct ApiClient {
    client: Client,
    api_url: String,
    settings: HttpSettings,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl ApiClient {
    pub fn new(api_url: &str, settings: HttpSettings) -> Result<Self> {
        Ok(Self {
            client: build_client(&settings)?,
            api_url: api_url.to_string(),
            settings,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    pub fn get_json(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = api_pairs(params);
        let max_retries = self.settings.max_retries;
        let payload = self.send_with_retry(max_retries, false, |client, url, user_agent| {
            client
                .get(url)
                .header("User-Agent", user_agent)
                .query(&pairs)
        })?;
        check_api_error(payload)
    }

    pub fn post_json(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let pairs = api_pairs(params);
        let max_retries = if is_write {
            self.settings.max_write_retries
        } else {
            self.settings.max_retries
        };
        let payload = self.send_with_retry(max_retries, is_write, |client, url, user_agent| {
            client
                .post(url)
                .header("User-Agent", user_agent)
                .form(&pairs)
        })?;
        check_api_error(payload)
    }

    fn send_with_retry<F>(&mut self, max_retries: usize, is_write: bool, build: F) -> Result<Value>
    where
        F: Fn(&Client, &str, &str) -> RequestBuilder,
    {
        let mut last_error = String::new();
        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let response = build(&self.client, &self.api_url, &self.settings.user_agent).send();
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<Value>() {
                            Ok(payload) => return Ok(payload),
                            Err(error) if is_retryable_body_error(&error) => {
                                last_error = format!("failed to read API response: {error}");
                            }
                            Err(error) => {
                                return Err(IoFailure::Fatal(format!(
                                    "failed to decode API JSON response: {error}"
                                ))
                                .into());
                            }
                        }
                    } else if !is_retryable_status(status) {
                        return Err(IoFailure::Fatal(format!(
                            "API request failed with HTTP {status}"
                        ))
                        .into());
                    } else {
                        last_error = format!("HTTP {status}");
                    }
                }
                Err(error) => {
                    if !is_retryable_error(&error) {
                        return Err(anyhow!(IoFailure::Fatal(error.to_string())))
                            .context("failed to call API");
                    }
                    last_error = error.to_string();
                }
            }
            if attempt < max_retries {
                tracing::warn!(
                    attempt,
                    error = %last_error,
                    url = %self.api_url,
                    "retrying API request"
                );
                wait_before_retry(self.settings.retry_delay_ms, attempt, is_write);
            }
        }
        Err(IoFailure::Transient {
            attempts: max_retries + 1,
            message: last_error,
        }
        .into())
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.settings.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.settings.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.get_json(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| IoFailure::Auth("failed to get login token".to_string()))?;

        let login_response = self.post_json(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                tracing::info!(user = username, url = %self.api_url, "logged in");
                Ok(())
            }
            other => Err(IoFailure::Auth(format!(
                "login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ))
            .into()),
        }
    }

    pub fn csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.get_json(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| IoFailure::Auth("failed to get csrf token".to_string()))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

pub(crate) fn build_client(settings: &HttpSettings) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(settings.timeout_ms))
        .cookie_store(true)
        .build()
        .context("failed to build HTTP client")
}

/// Sleep `base * 2^attempt` (doubled for writes) plus up to 100ms jitter.
pub(crate) fn wait_before_retry(retry_delay_ms: u64, attempt: usize, is_write: bool) {
    sleep(retry_delay(retry_delay_ms, attempt, is_write));
}

fn retry_delay(retry_delay_ms: u64, attempt: usize, is_write: bool) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(16);
    let base = retry_delay_ms.saturating_mul(2u64.saturating_pow(exponent));
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::from(duration.subsec_millis() % 100))
        .unwrap_or(0);
    let multiplier = if is_write { 2u64 } else { 1u64 };
    Duration::from_millis(base.saturating_mul(multiplier).saturating_add(jitter))
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// A success status whose body could not be read or decoded in full.
pub(crate) fn is_retryable_body_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_body() || error.is_decode()
}

const AUTH_ERROR_CODES: &[&str] = &[
    "badtoken",
    "notloggedin",
    "mustbeloggedin",
    "assertuserfailed",
    "assertbotfailed",
    "permissiondenied",
    "readapidenied",
];

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

/// `{"error": {"code", "info"}}` payloads become typed failures: edit
/// conflicts, authentication failures, or fatal for everything else.
fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        let message = format!("API error [{code}]: {info}");
        let failure = if code == "editconflict" {
            IoFailure::EditConflict(message)
        } else if AUTH_ERROR_CODES.contains(&code) {
            IoFailure::Auth(message)
        } else {
            IoFailure::Fatal(message)
        };
        return Err(failure.into());
    }
    Ok(payload)
}

/// The first `IoFailure` in an error chain.
pub fn io_failure(error: &anyhow::Error) -> Option<&IoFailure> {
    error.chain().find_map(|cause| cause.downcast_ref::<IoFailure>())
}

/// Whether an error chain carries a retry-exhausted transient failure.
pub fn is_transient(error: &anyhow::Error) -> bool {
    io_failure(error).is_some_and(IoFailure::is_transient)
}

/// Whether an error chain carries a login, token or permission failure.
pub fn is_auth_failure(error: &anyhow::Error) -> bool {
    io_failure(error).is_some_and(IoFailure::is_auth)
}

#[derive(Debug, Deserialize)]
struct TokenQueryResponse {
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    csrftoken: Option<String>,
    logintoken: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    login: LoginPayload,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}
