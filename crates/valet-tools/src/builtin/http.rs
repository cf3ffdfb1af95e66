// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in web fetch tool.
//!
//! Makes HTTP requests with SSRF prevention: literal private IPs are blocked
//! up front, and hostnames are filtered at DNS resolution by the SSRF-safe
//! resolver. Response bodies are truncated to 50KB to bound token usage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use valet_core::ValetError;
use valet_security::ssrf::{validate_url_host, SsrfSafeResolver};

use crate::tool::{Tool, ToolOutput};

/// Maximum response body size in bytes (50KB).
const MAX_RESPONSE_SIZE: usize = 50 * 1024;

/// Fetches web pages and APIs over HTTP(S).
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    /// Creates the tool with an SSRF-filtering DNS resolver.
    ///
    /// `allowed_private_ips` lists private addresses that may be reached
    /// anyway (e.g. a LAN service the owner trusts).
    pub fn new(allowed_private_ips: Vec<String>) -> Result<Self, ValetError> {
        let client = reqwest::Client::builder()
            .dns_resolver(Arc::new(SsrfSafeResolver::new(allowed_private_ips)))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ValetError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return the response body"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                },
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST"],
                    "default": "GET",
                    "description": "HTTP method to use"
                },
                "body": {
                    "type": "string",
                    "description": "Request body (POST only)"
                }
            },
            "required": ["url"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError> {
        let url = input["url"]
            .as_str()
            .ok_or_else(|| ValetError::ToolRecoverable {
                tool: "web_fetch".to_string(),
                message: "missing required 'url' parameter".to_string(),
            })?;

        let parsed = match reqwest::Url::parse(url) {
            Ok(u) => u,
            Err(e) => return Ok(ToolOutput::error(format!("invalid URL: {e}"))),
        };
        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Ok(ToolOutput::error(format!(
                "URL scheme '{scheme}' not allowed. Only http and https are supported."
            )));
        }

        if let Err(e) = validate_url_host(url) {
            return Ok(ToolOutput::error(format!("blocked: {e}")));
        }

        let method = input["method"].as_str().unwrap_or("GET");
        let mut request = match method {
            "POST" => self.client.post(parsed),
            _ => self.client.get(parsed),
        };
        if let Some(body) = input["body"].as_str() {
            request = request.body(body.to_string());
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutput::error(format!("request failed: {e}"))),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let truncated = if body.len() > MAX_RESPONSE_SIZE {
            let mut end = MAX_RESPONSE_SIZE;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}...\n\n[Response truncated from {} to {} bytes]",
                &body[..end],
                body.len(),
                end
            )
        } else {
            body
        };

        Ok(ToolOutput {
            content: format!("HTTP {status}\n\n{truncated}"),
            is_error: !status.is_success(),
        })
    }
}
