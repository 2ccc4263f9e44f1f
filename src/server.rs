//! MCP Server: stdio transport, JSON-RPC 2.0, newline-delimited.
//!
//! Implements the Model Context Protocol (2025-06-18) server over
//! stdin/stdout. Reads JSON-RPC requests from stdin (one per line),
//! dispatches to the tool router, and writes responses to stdout.
//!
//! Protocol flow:
//! 1. Client sends `initialize` → server responds with capabilities
//! 2. Client sends `notifications/initialized`
//! 3. Client sends `tools/list` → server returns tool definitions
//! 4. Client sends `tools/call` → server executes tool and returns result
//! 5. Client closes stdin → server exits
//!
//! Requests are handled one at a time; a long-running tool call blocks the
//! next line until it returns.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EnvMap;
use crate::tools::ToolRouter;

/// Maximum size of a single JSON-RPC line (10 MiB).
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

pub const PROTOCOL_VERSION: &str = "2025-06-18";

pub const SERVER_NAME: &str = "aider-mcp";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 types
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// MCP protocol types
// ---------------------------------------------------------------------------

/// MCP server info returned in initialize response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfo {
    name: String,
    version: String,
}

/// MCP server capabilities.
#[derive(Debug, Serialize)]
struct ServerCapabilities {
    tools: ToolsCapability,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolsCapability {
    list_changed: bool,
}

/// MCP initialize result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    capabilities: ServerCapabilities,
    server_info: ServerInfo,
}

/// MCP tool definition for tools/list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

/// MCP tools/list result.
#[derive(Debug, Serialize)]
struct ToolsListResult {
    tools: Vec<ToolDefinition>,
}

/// MCP tools/call params.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
    #[serde(default, rename = "_meta")]
    meta: CallMeta,
}

/// Per-call metadata. `environment` carries the client's overrides for
/// model names, credentials, and report directories.
#[derive(Debug, Default, Deserialize)]
struct CallMeta {
    #[serde(default)]
    environment: EnvMap,
}

/// MCP content item in tools/call response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".to_owned(),
            text: text.into(),
        }
    }
}

/// MCP tools/call result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ContentItem>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Server main loop
// ---------------------------------------------------------------------------

/// Run the MCP server on stdin/stdout until stdin closes.
///
/// # Errors
///
/// Returns an error if stdin/stdout I/O fails fatally.
pub fn run_mcp_server(router: &ToolRouter) -> Result<()> {
    info!(
        workspace = %router.settings().workspace.display(),
        aider = router.settings().aider_command,
        "{SERVER_NAME} MCP server starting"
    );

    let stdin = std::io::stdin();
    let mut reader = std::io::BufReader::new(stdin.lock());
    let mut stdout = std::io::stdout().lock();
    serve(router, &mut reader, &mut stdout)?;

    info!("{SERVER_NAME} MCP server stopped");
    Ok(())
}

/// Serve requests from `reader`, writing one response line per request to
/// `writer`. Returns on EOF.
///
/// # Errors
///
/// Returns an error if reading or writing fails.
pub fn serve(router: &ToolRouter, reader: &mut impl BufRead, writer: &mut impl Write) -> Result<()> {
    let mut line_buf = Vec::new();

    loop {
        line_buf.clear();
        let line = match read_line_limited(reader, &mut line_buf, MAX_LINE_BYTES)
            .context("failed to read from stdin")?
        {
            LineRead::Eof => {
                info!("stdin closed, shutting down");
                break;
            }
            LineRead::Oversized => {
                warn!(max = MAX_LINE_BYTES, "request line too large, discarded");
                let resp = error_response(
                    None,
                    -32700,
                    &format!("parse error: line exceeds maximum size ({MAX_LINE_BYTES} bytes)"),
                );
                write_response(writer, &resp)?;
                continue;
            }
            LineRead::Line => match std::str::from_utf8(&line_buf) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "non-UTF-8 request line");
                    let resp = error_response(None, -32700, "parse error: request is not valid UTF-8");
                    write_response(writer, &resp)?;
                    continue;
                }
            },
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!(raw = trimmed, "received request");

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "invalid JSON-RPC request");
                let resp = error_response(None, -32700, &format!("parse error: {e}"));
                write_response(writer, &resp)?;
                continue;
            }
        };

        // "jsonrpc" MUST be exactly "2.0".
        if request.jsonrpc != "2.0" {
            warn!(
                version = request.jsonrpc,
                "invalid JSON-RPC version (expected \"2.0\")"
            );
            let resp = error_response(
                request.id.clone(),
                -32600,
                &format!("invalid request: jsonrpc version must be \"2.0\", got \"{}\"", request.jsonrpc),
            );
            write_response(writer, &resp)?;
            continue;
        }

        let is_notification = request.id.is_none();
        let response = dispatch(router, &request);

        if is_notification {
            // Notifications MUST NOT receive a response.
            debug!(method = request.method, "notification handled (no response)");
            continue;
        }

        if let Some(resp) = response {
            write_response(writer, &resp)?;
        }
    }

    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate handler.
fn dispatch(router: &ToolRouter, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
    match req.method.as_str() {
        "initialize" => Some(handle_initialize(req)),
        "notifications/initialized" => {
            info!("client initialized");
            None
        }
        "tools/list" => Some(handle_tools_list(router, req)),
        "tools/call" => Some(handle_tools_call(router, req)),
        "ping" => Some(handle_ping(req)),
        _ => {
            warn!(method = req.method, "unknown method");
            Some(error_response(
                req.id.clone(),
                -32601,
                &format!("method not found: {}", req.method),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_initialize(req: &JsonRpcRequest) -> JsonRpcResponse {
    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_owned(),
        capabilities: ServerCapabilities {
            tools: ToolsCapability {
                list_changed: false,
            },
        },
        server_info: ServerInfo {
            name: SERVER_NAME.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        },
    };

    success_response(req.id.clone(), &result)
}

fn handle_tools_list(router: &ToolRouter, req: &JsonRpcRequest) -> JsonRpcResponse {
    let tools = router.list_tools();
    let result = ToolsListResult { tools };
    success_response(req.id.clone(), &result)
}

fn handle_tools_call(router: &ToolRouter, req: &JsonRpcRequest) -> JsonRpcResponse {
    let params: ToolCallParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return error_response(
                req.id.clone(),
                -32602,
                &format!("invalid tools/call params: {e}"),
            );
        }
    };

    debug!(
        tool = params.name,
        client_env_keys = params.meta.environment.len(),
        "tools/call"
    );
    let result = router.call_tool(&params.name, params.arguments, &params.meta.environment);
    success_response(req.id.clone(), &result)
}

fn handle_ping(req: &JsonRpcRequest) -> JsonRpcResponse {
    success_response(req.id.clone(), &serde_json::json!({}))
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn success_response(id: Option<serde_json::Value>, result: &impl Serialize) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(v) => JsonRpcResponse {
            jsonrpc: "2.0".to_owned(),
            id,
            result: Some(v),
            error: None,
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize success response");
            JsonRpcResponse {
                jsonrpc: "2.0".to_owned(),
                id,
                result: None,
                error: Some(JsonRpcError {
                    code: -32603,
                    message: format!("internal error: failed to serialize result: {e}"),
                    data: None,
                }),
            }
        }
    }
}

fn error_response(id: Option<serde_json::Value>, code: i64, message: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_owned(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.to_owned(),
            data: None,
        }),
    }
}

/// Write a JSON-RPC response as a single line.
fn write_response(out: &mut impl Write, resp: &JsonRpcResponse) -> Result<()> {
    let json = serde_json::to_string(resp).context("failed to serialize response")?;
    debug!(response = json, "sending response");
    out.write_all(json.as_bytes())
        .context("failed to write to stdout")?;
    out.write_all(b"\n")
        .context("failed to write newline to stdout")?;
    out.flush().context("failed to flush stdout")?;
    Ok(())
}

/// Outcome of [`read_line_limited`].
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    /// Line exceeded the limit; it was consumed and discarded.
    Oversized,
}

/// Read one line of raw bytes into `buf`, stopping at newline or `max_bytes`.
///
/// Bytes are collected before UTF-8 decoding so a multi-byte character split
/// across buffer refills is not misread.
fn read_line_limited(reader: &mut impl BufRead, buf: &mut Vec<u8>, max_bytes: usize) -> Result<LineRead> {
    loop {
        let available = reader.fill_buf().context("stdin fill_buf failed")?;
        if available.is_empty() {
            return Ok(if buf.is_empty() { LineRead::Eof } else { LineRead::Line });
        }
        let (consumed, found_newline) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        if buf.len() + consumed > max_bytes {
            reader.consume(consumed);
            if !found_newline {
                skip_to_newline(reader)?;
            }
            buf.clear();
            return Ok(LineRead::Oversized);
        }
        buf.extend_from_slice(&available[..consumed]);
        reader.consume(consumed);
        if found_newline {
            return Ok(LineRead::Line);
        }
    }
}

fn skip_to_newline(reader: &mut impl BufRead) -> Result<()> {
    loop {
        let rest = reader.fill_buf().context("stdin fill_buf failed")?;
        if rest.is_empty() {
            return Ok(());
        }
        if let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let n = rest.len();
        reader.consume(n);
    }
}
