//! Gemini `generateContent` client.
//!
//! One request, one response: no streaming, no retry. A well-formed response
//! with no text is an error, not an empty success.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult, first_line};

/// A single generation request.
#[derive(Debug, Clone, Copy)]
pub struct GenerativeCall<'a> {
    pub api_key: &'a str,
    pub model: &'a str,
    pub prompt: &'a str,
}

/// Text generation backend. Implementations must be shareable across the
/// panel fan-out threads.
pub trait GenerativeModel: Send + Sync {
    /// Send `call.prompt` and return the response text.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Api`] on transport/HTTP failure or empty output,
    /// [`BridgeError::TimedOut`] when the deadline passes.
    fn generate(&self, call: &GenerativeCall<'_>) -> BridgeResult<String>;
}

/// Blocking HTTP client for the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiClient {
    /// Build a client with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Api`] if the TLS backend cannot be initialized.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> BridgeResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Api(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }
}

impl GenerativeModel for GeminiClient {
    fn generate(&self, call: &GenerativeCall<'_>) -> BridgeResult<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_owned()),
                parts: vec![Part {
                    text: Some(call.prompt.to_owned()),
                }],
            }],
        };

        debug!(model = call.model, prompt_chars = call.prompt.len(), "gemini request");
        let response = self
            .http
            .post(self.endpoint(call.model))
            .header("x-goog-api-key", call.api_key)
            .json(&request)
            .send()
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(%status, body = %body, "gemini returned error status");
            return Err(BridgeError::Api(format!(
                "Gemini API error ({status}): {}",
                api_error_message(&body)
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| self.transport_error(&e))?;
        parsed.into_text()
    }
}

impl GeminiClient {
    fn transport_error(&self, e: &reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::TimedOut {
                what: "Gemini request".to_owned(),
                after: self.timeout,
            }
        } else if e.is_decode() {
            BridgeError::Api(format!("failed to parse Gemini response: {e}"))
        } else {
            BridgeError::Api(format!("failed to reach Gemini: {e}"))
        }
    }
}

/// Prefer the structured `error.message`; fall back to the first body line.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .map_or_else(|| first_line(body), |m| first_line(&m))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> BridgeResult<String> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let first = self.candidates.into_iter().next();
        let finish_reason = first.as_ref().and_then(|c| c.finish_reason.clone());
        let text: String = first
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let mut msg = "no text content received".to_owned();
            if let Some(reason) = block_reason {
                msg.push_str(&format!(" (prompt blocked: {reason})"));
            } else if let Some(reason) = finish_reason {
                msg.push_str(&format!(" (finish reason: {reason})"));
            }
            return Err(BridgeError::Api(msg));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::error::ErrorKind;

    /// Serve one canned HTTP response and return the raw request text.
    fn serve_once(status: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            let mut buf = [0_u8; 4096];
            // Read headers, then the declared body length.
            loop {
                let n = stream.read(&mut buf).expect("read");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(idx) = text.find("\r\n\r\n") {
                    let len = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= idx + 4 + len {
                        break;
                    }
                }
            }
            let reply = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).expect("write");
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}/v1beta"), handle)
    }

    fn call<'a>(prompt: &'a str) -> GenerativeCall<'a> {
        GenerativeCall {
            api_key: "test-key",
            model: "gemini-test",
            prompt,
        }
    }

    #[test]
    fn returns_candidate_text() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello "},{"text":"panel"}]}}]}"#,
        );
        let client = GeminiClient::new(base, Duration::from_secs(10)).expect("client");
        let text = client.generate(&call("say hi")).expect("generate");
        assert_eq!(text, "Hello panel");

        let request = server.join().expect("join");
        assert!(request.starts_with("POST /v1beta/models/gemini-test:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
        assert!(request.contains("say hi"));
    }

    #[test]
    fn empty_candidates_are_an_error() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"candidates":[],"promptFeedback":{"blockReason":"SAFETY"}}"#,
        );
        let client = GeminiClient::new(base, Duration::from_secs(10)).expect("client");
        let err = client.generate(&call("x")).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(err.to_string().contains("no text content"));
        assert!(err.to_string().contains("SAFETY"));
        server.join().expect("join");
    }

    #[test]
    fn http_error_status_is_api_error() {
        let (base, server) = serve_once(
            "500 Internal Server Error",
            r#"{"error":{"code":500,"message":"backend exploded\nstack..."}}"#,
        );
        let client = GeminiClient::new(base, Duration::from_secs(10)).expect("client");
        let err = client.generate(&call("x")).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Api);
        let msg = err.to_string();
        assert!(msg.contains("500"), "{msg}");
        assert!(msg.contains("backend exploded"));
        assert!(!msg.contains("stack"));
        server.join().expect("join");
    }

    #[test]
    fn unreachable_host_is_api_error() {
        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .expect("bind")
            .local_addr()
            .expect("addr")
            .port();
        let client =
            GeminiClient::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(5)).expect("client");
        let err = client.generate(&call("x")).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Api);
    }
}
