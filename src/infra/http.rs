use std::time::Duration;

use reqwest::{
    Client, Method, Response, StatusCode,
    header::{ACCEPT, CONTENT_TYPE, HeaderMap, RETRY_AFTER},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::{Url, form_urlencoded};

use crate::error::{AppError, AppResult};
use crate::infra::retry::{self, RetryPolicy};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_ERROR_BODY_CHARS: usize = 300;
const SECRET_QUERY_KEYS: [&str; 2] = ["apiKey", "key"];

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn into_json<T: DeserializeOwned>(self, what: &str) -> AppResult<T> {
        match self {
            ResponseBody::Json(value) => serde_json::from_value(value)
                .map_err(|err| AppError::unexpected(format!("decoding {what}"), err)),
            ResponseBody::Text(text) => Err(AppError::unexpected(
                format!("decoding {what}"),
                format!("expected a JSON response, got: {}", truncate(&text)),
            )),
        }
    }
}

/// HTTP transport. Every request goes through the retry executor with the
/// client's policy and gets its own timeout per attempt.
#[derive(Clone)]
pub struct HttpClient {
    http: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(policy: RetryPolicy) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("ticketsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| AppError::unexpected("building the HTTP client", err))?;
        Ok(Self { http, policy })
    }

    /// Same connection pool, different retry policy.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            http: self.http.clone(),
            policy,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: &RequestBody,
    ) -> AppResult<ResponseBody> {
        retry::execute(&self.policy, || self.send_once(&method, url, headers, body)).await
    }

    pub async fn get(&self, url: &str, headers: &HeaderMap) -> AppResult<ResponseBody> {
        self.request(Method::GET, url, headers, &RequestBody::Empty)
            .await
    }

    pub async fn put(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &RequestBody,
    ) -> AppResult<ResponseBody> {
        self.request(Method::PUT, url, headers, body).await
    }

    pub async fn patch(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &RequestBody,
    ) -> AppResult<ResponseBody> {
        self.request(Method::PATCH, url, headers, body).await
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: &RequestBody,
    ) -> AppResult<ResponseBody> {
        debug!(%method, url = %redact(url), "sending request");

        let mut request = self
            .http
            .request(method.clone(), url)
            .headers(headers.clone())
            .header(ACCEPT, "application/json");
        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::Form(pairs) => request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encode_form(pairs)),
        };

        let response = request.send().await.map_err(network_error)?;
        read_response(response).await
    }
}

async fn read_response(response: Response) -> AppResult<ResponseBody> {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.contains("json"));
    let text = response.text().await.map_err(network_error)?;

    debug!(status = status.as_u16(), bytes = text.len(), "received response");

    if !status.is_success() {
        return Err(classify(status, retry_after, &text));
    }

    if is_json && !text.trim().is_empty() {
        serde_json::from_str(&text)
            .map(ResponseBody::Json)
            .map_err(|err| AppError::unexpected("decoding a JSON response", err))
    } else {
        Ok(ResponseBody::Text(text))
    }
}

pub fn classify(status: StatusCode, retry_after: Option<Duration>, body: &str) -> AppError {
    let message = error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });

    match status.as_u16() {
        401 | 403 => AppError::Authentication {
            status: status.as_u16(),
            message,
        },
        429 => AppError::Api {
            status: 429,
            message,
            retry_after,
        },
        code => AppError::Api {
            status: code,
            message,
            retry_after: None,
        },
    }
}

fn network_error(err: reqwest::Error) -> AppError {
    AppError::Network {
        timed_out: err.is_timeout(),
        message: err.without_url().to_string(),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Pulls a readable message out of an error body. Understands
/// `{"errors": ["..."]}`, `{"errors": [{"message": "..."}]}` and
/// `{"message": "..."}`; anything else is returned as truncated text.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(errors) = value.get("errors").and_then(Value::as_array) {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|entry| {
                    entry
                        .as_str()
                        .or_else(|| entry.get("message").and_then(Value::as_str))
                })
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return Some(message.to_string());
        }
    }

    Some(truncate(body))
}

fn truncate(text: &str) -> String {
    let mut truncated: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if text.chars().count() > MAX_ERROR_BODY_CHARS {
        truncated.push('…');
    }
    truncated
}

fn encode_form(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Hides credentials carried in the query string before logging a URL.
fn redact(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query().is_none() {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(key, value)| {
            let value = if SECRET_QUERY_KEYS.contains(&key.as_ref()) {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}
