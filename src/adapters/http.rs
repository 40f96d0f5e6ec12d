use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::adapters::HttpSettings;
use crate::domain::SourceId;
use crate::error::{KiraError, LookupError};
use crate::ratelimit::MinIntervalLimiter;

/// Blocking JSON client shared by the HTTP adapters: default headers, a
/// per-call timeout, a per-source rate floor and status classification.
pub struct JsonFetcher {
    source: SourceId,
    client: Client,
    limiter: MinIntervalLimiter,
}

impl JsonFetcher {
    pub fn new(
        source: SourceId,
        settings: &HttpSettings,
        default_interval: Duration,
        extra_headers: &[(&'static str, String)],
    ) -> Result<Self, KiraError> {
        let header_error = |err: String| KiraError::HttpClient {
            source_id: source,
            message: err,
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ce/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| header_error(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in extra_headers {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value.trim()).map_err(|err| header_error(err.to_string()))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| header_error(err.to_string()))?;

        Ok(Self {
            source,
            client,
            limiter: MinIntervalLimiter::new(settings.min_interval.unwrap_or(default_interval)),
        })
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn min_interval(&self) -> Duration {
        self.limiter.interval()
    }

    /// GETs a JSON document. `Ok(None)` means the source answered 404.
    pub fn get_json(&self, url: Url, query: &[(&str, &str)]) -> Result<Option<Value>, LookupError> {
        let request = self.client.get(url).query(query);
        self.send(request)
    }

    fn send(&self, request: RequestBuilder) -> Result<Option<Value>, LookupError> {
        self.limiter.wait();
        let response = request
            .send()
            .map_err(|err| classify_transport_error(self.source, &err))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| format!("{} request failed", self.source));
            let message = format!("status {status}: {}", truncate(&message, 300));
            return Err(if is_retryable_status(status) {
                LookupError::transient(self.source, message)
            } else {
                LookupError::permanent(self.source, message)
            });
        }

        let body = response
            .text()
            .map_err(|err| classify_transport_error(self.source, &err))?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|err| LookupError::permanent(self.source, format!("invalid JSON: {err}")))
    }
}

/// Appends path segments to a base URL, percent-encoding each one.
pub fn endpoint(source: SourceId, base: &str, segments: &[&str]) -> Result<Url, LookupError> {
    let mut url = Url::parse(base)
        .map_err(|err| LookupError::permanent(source, format!("invalid base URL {base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| LookupError::permanent(source, format!("base URL {base} cannot have a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

fn classify_transport_error(source: SourceId, err: &reqwest::Error) -> LookupError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        LookupError::transient(source, err.to_string())
    } else {
        LookupError::permanent(source, err.to_string())
    }
}

fn truncate(message: &str, limit: usize) -> &str {
    match message.char_indices().nth(limit) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

/// Reads a string or number at a JSON pointer as trimmed text.
pub fn text_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
