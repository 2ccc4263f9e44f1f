//! `aider-mcp`: MCP server that drives aider and Gemini expert panels.
//!
//! Exposes a set of tools via the Model Context Protocol (MCP) over stdio
//! (JSON-RPC 2.0, newline-delimited).
//!
//! # Tools
//!
//! - `run_research`, `run_docs`, `run_security`, `run_code`, `run_verify`,
//!   `run_progress`, `run_task`: aider with a fixed role preamble
//! - `prompt_aider`: aider with a caller-chosen task type
//! - `double_compute`: the same aider prompt run twice, captured
//! - `finance_experts`: investor-persona panel plus follow-up recommendation
//! - `ceo_and_board`: board-meeting panel plus follow-up recommendation
//!
//! # Architecture
//!
//! ```text
//! stdin (JSON-RPC) → server → ToolRouter → tools::* ─┬→ exec (aider subprocess)
//!                                                     └→ panel → gemini (HTTP)
//! stdout (JSON-RPC) ←─────────── Envelope ────────────┘
//! ```
//!
//! Configuration flows from [`config::Settings`] (startup) and the per-call
//! client environment carried in `tools/call` `_meta.environment`.

pub mod aider;
pub mod config;
pub mod error;
pub mod exec;
pub mod gemini;
pub mod panel;
pub mod server;
pub mod tools;
pub mod util;

pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use server::{run_mcp_server, serve};
