use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::AnnotateError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

pub fn user_agent() -> String {
    format!("fragment-annotator/{}", env!("CARGO_PKG_VERSION"))
}

pub fn build_client(
    timeout: Duration,
    map_err: fn(String) -> AnnotateError,
) -> Result<Client, AnnotateError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&user_agent()).map_err(|err| map_err(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| map_err(err.to_string()))
}

/// Sends an idempotent request, retrying throttling, 5xx and transport errors.
pub fn send_with_retries<F>(
    mut make_req: F,
    map_err: fn(String) -> AnnotateError,
) -> Result<Response, AnnotateError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        let response = make_req().send();
        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    tracing::debug!(status, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    tracing::debug!(error = %err, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Err(map_err(err.to_string()));
            }
        }
    }
}

/// Returns the body of a successful response, or the status error built by `status_err`.
pub fn read_text(
    response: Response,
    map_err: fn(String) -> AnnotateError,
    status_err: fn(u16, String) -> AnnotateError,
) -> Result<String, AnnotateError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "request failed".to_string());
        return Err(status_err(status, message));
    }
    response.text().map_err(|err| map_err(err.to_string()))
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    thread::sleep(Duration::from_millis(delay));
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
