use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wayfinder_core::config::BackendConfig;
use wayfinder_core::{Error, GenerationRecord, Result};

use crate::client::build_http_client;
use crate::ndjson::NdjsonDecoder;
use crate::{GenerationOptions, GenerativeBackend, TextSink};

/// Ollama-compatible `/generate` + `/tags` backend.
pub struct OllamaBackend {
    client: Client,
    api_base: String,
    model: String,
    liveness_timeout: Duration,
    /// Whole-request limit for buffered calls; idle limit between stream chunks.
    request_timeout: Duration,
}

impl OllamaBackend {
    pub fn new(config: &BackendConfig) -> Self {
        let api_base = config.api_base.trim().trim_end_matches('/').to_string();
        // 本地推理可能很慢，生成请求使用较长的超时时间
        let request_timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let client = build_http_client(config.proxy.as_deref(), &api_base, request_timeout);
        Self {
            client,
            api_base,
            model: Self::normalize_model(&config.model).to_string(),
            liveness_timeout: Duration::from_millis(config.liveness_timeout_ms.max(1)),
            request_timeout,
        }
    }

    /// Strip "ollama/" prefix from model names.
    fn normalize_model(model: &str) -> &str {
        model.strip_prefix("ollama/").unwrap_or(model)
    }

    fn generate_url(&self) -> String {
        format!("{}/generate", self.api_base)
    }

    fn tags_url(&self) -> String {
        format!("{}/tags", self.api_base)
    }

    fn build_request<'a>(
        &'a self,
        prompt: &'a str,
        options: &GenerationOptions,
        stream: bool,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt,
            stream,
            options: SamplingOptions {
                temperature: options.temperature,
                top_p: options.top_p,
                num_predict: options.max_tokens,
            },
        }
    }

    async fn send(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = self.generate_url();
        let request = self.build_request(prompt, options, stream);

        info!(
            url = %url,
            model = %self.model,
            stream,
            prompt_len = prompt.len(),
            "Calling generative backend"
        );

        let mut builder = self.client.post(&url).json(&request);
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }
        // Streaming has no whole-request limit; bound the wait for headers here
        // and the gap between chunks in `generate_stream`.
        let response = tokio::time::timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| self.timed_out("waiting for response"))?
            .map_err(|e| request_error("request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let raw_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %preview(&raw_body), "Backend API error");
            return Err(Error::Backend(format!(
                "API error {}: {}",
                status,
                preview(&raw_body)
            )));
        }
        Ok(response)
    }

    fn timed_out(&self, what: &str) -> Error {
        warn!(timeout_secs = self.request_timeout.as_secs(), "Backend timed out {}", what);
        Error::Timeout(format!(
            "backend timed out after {}s {}",
            self.request_timeout.as_secs(),
            what
        ))
    }
}

fn request_error(context: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{}: {}", context, e))
    } else {
        Error::Backend(format!("{}: {}", context, e))
    }
}

fn preview(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(500)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

fn check_record(record: &GenerationRecord) -> Result<()> {
    match &record.error {
        Some(msg) => Err(Error::Backend(msg.clone())),
        None => Ok(()),
    }
}

#[async_trait]
impl GenerativeBackend for OllamaBackend {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let response = self.send(prompt, options, false).await?;
        let raw_body = response
            .text()
            .await
            .map_err(|e| request_error("failed to read body", e))?;
        debug!(body_len = raw_body.len(), "Backend raw response");

        let record: GenerationRecord = serde_json::from_str(&raw_body).map_err(|e| {
            Error::Backend(format!(
                "failed to parse response: {}. Body: {}",
                e,
                preview(&raw_body)
            ))
        })?;
        check_record(&record)?;
        Ok(record.response)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        sink: &mut TextSink<'_>,
    ) -> Result<()> {
        let response = self.send(prompt, options, true).await?;
        let mut stream = response.bytes_stream();
        let mut decoder = NdjsonDecoder::new();
        let mut deltas = 0usize;

        loop {
            let next = tokio::time::timeout(self.request_timeout, stream.next())
                .await
                .map_err(|_| self.timed_out("between stream chunks"))?;
            let Some(chunk) = next else {
                break;
            };
            let bytes = chunk.map_err(|e| request_error("stream read failed", e))?;
            for record in decoder.push(&bytes) {
                check_record(&record)?;
                if !record.response.is_empty() {
                    deltas += 1;
                    if !sink(&record.response) {
                        // Dropping `stream` here closes the response body.
                        debug!(deltas, "Stream consumer gone, cancelling");
                        return Ok(());
                    }
                }
                if record.done {
                    debug!(deltas, "Backend stream done");
                    return Ok(());
                }
            }
        }

        if let Some(record) = decoder.finish() {
            check_record(&record)?;
            if !record.response.is_empty() {
                sink(&record.response);
            }
        }
        debug!(deltas, "Backend stream closed");
        Ok(())
    }

    async fn check_available(&self) -> bool {
        let url = self.tags_url();
        match self
            .client
            .get(&url)
            .timeout(self.liveness_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Backend liveness check got non-success status");
                false
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Backend unreachable");
                false
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.api_base
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Debug, Serialize)]
struct SamplingOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP exchange with a canned status and body, then close.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n{}",
                status, body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}/api", addr)
    }

    /// Accept one connection, optionally send `prefix`, then stay silent.
    async fn serve_then_stall(prefix: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            if !prefix.is_empty() {
                socket.write_all(prefix.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            }
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(socket);
        });
        format!("http://{}/api", addr)
    }

    fn backend(api_base: &str) -> OllamaBackend {
        OllamaBackend::new(&BackendConfig {
            api_base: api_base.to_string(),
            model: "ollama/qwen2.5:7b".to_string(),
            liveness_timeout_ms: 500,
            request_timeout_secs: 5,
            ..BackendConfig::default()
        })
    }

    #[test]
    fn test_normalize_model() {
        assert_eq!(OllamaBackend::normalize_model("ollama/llama3"), "llama3");
        assert_eq!(OllamaBackend::normalize_model("qwen2.5:7b"), "qwen2.5:7b");
    }

    #[test]
    fn test_request_body() {
        let b = backend("http://localhost:11434/api/");
        assert_eq!(b.generate_url(), "http://localhost:11434/api/generate");
        assert_eq!(b.tags_url(), "http://localhost:11434/api/tags");

        let options = GenerationOptions {
            temperature: 0.5,
            top_p: 0.25,
            max_tokens: 64,
        };
        let body = serde_json::to_value(b.build_request("hi", &options, true)).unwrap();
        assert_eq!(body["model"], "qwen2.5:7b");
        assert_eq!(body["prompt"], "hi");
        assert_eq!(body["stream"], true);
        assert_eq!(body["options"]["temperature"], 0.5);
        assert_eq!(body["options"]["top_p"], 0.25);
        assert_eq!(body["options"]["num_predict"], 64);
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Port 1 is never an Ollama server; connections are refused.
        let b = backend("http://127.0.0.1:1/api");
        assert!(!b.check_available().await);
        let err = b.generate("hi", &GenerationOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[tokio::test]
    async fn test_liveness_status() {
        let ok = backend(&serve_once("200 OK", r#"{"models":[]}"#).await);
        assert!(ok.check_available().await);

        let failing = backend(&serve_once("500 Internal Server Error", "boom").await);
        assert!(!failing.check_available().await);
    }

    #[tokio::test]
    async fn test_generate_buffered() {
        let url = serve_once(
            "200 OK",
            r#"{"model":"qwen2.5:7b","response":"Button 有 type、size 属性","done":true,"total_duration":1}"#,
        )
        .await;
        let text = backend(&url)
            .generate("prompt", &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "Button 有 type、size 属性");
    }

    #[tokio::test]
    async fn test_generate_error_status() {
        let url = serve_once("404 Not Found", r#"{"error":"model not found"}"#).await;
        let err = backend(&url)
            .generate("prompt", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(m) if m.contains("404")));
    }

    #[tokio::test]
    async fn test_generate_stream_forwards_deltas() {
        let url = serve_once(
            "200 OK",
            "{\"response\":\"你\",\"done\":false}\n{\"response\":\"\",\"done\":false}\n{\"response\":\"好\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n{\"response\":\"ignored\",\"done\":false}\n",
        )
        .await;
        let mut chunks: Vec<String> = Vec::new();
        let mut sink = |delta: &str| {
            chunks.push(delta.to_string());
            true
        };
        backend(&url)
            .generate_stream("prompt", &GenerationOptions::default(), &mut sink)
            .await
            .unwrap();
        assert_eq!(chunks, vec!["你", "好"]);
    }

    #[tokio::test]
    async fn test_generate_stream_stops_when_consumer_gone() {
        let url = serve_once(
            "200 OK",
            "{\"response\":\"a\",\"done\":false}\n{\"response\":\"b\",\"done\":false}\n{\"response\":\"c\",\"done\":true}\n",
        )
        .await;
        let mut seen = 0;
        let mut sink = |_: &str| {
            seen += 1;
            false
        };
        backend(&url)
            .generate_stream("prompt", &GenerationOptions::default(), &mut sink)
            .await
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn test_generate_stream_error_record() {
        let url = serve_once(
            "200 OK",
            "{\"response\":\"partial\",\"done\":false}\n{\"error\":\"out of memory\"}\n",
        )
        .await;
        let mut sink = |_: &str| true;
        let err = backend(&url)
            .generate_stream("prompt", &GenerationOptions::default(), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(m) if m.contains("out of memory")));
    }

    #[tokio::test]
    async fn test_silent_backend_times_out() {
        let url = serve_then_stall("").await;
        let b = OllamaBackend::new(&BackendConfig {
            api_base: url,
            request_timeout_secs: 1,
            ..BackendConfig::default()
        });
        let err = b
            .generate("prompt", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out_after_partial_output() {
        let url = serve_then_stall(
            "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nTransfer-Encoding: chunked\r\n\r\n\
20\r\n{\"response\":\"Tab\",\"done\":false}\n\r\n",
        )
        .await;
        let b = OllamaBackend::new(&BackendConfig {
            api_base: url,
            request_timeout_secs: 1,
            ..BackendConfig::default()
        });
        let mut chunks: Vec<String> = Vec::new();
        let mut sink = |delta: &str| {
            chunks.push(delta.to_string());
            true
        };
        let err = b
            .generate_stream("prompt", &GenerationOptions::default(), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);
        assert_eq!(chunks, vec!["Tab"]);
    }
}
