//! MCP (Model Context Protocol) server for evolver.
//!
//! Exposes the evolution loop as MCP tools over stdio, so an assistant can
//! act as the proposer:
//!
//! - `start_evolution`: open a session and get the first prompt
//! - `step_evolution`: submit a reply, get the next prompt or the final result
//! - `list_problems`: registered problems
//!
//! ```text
//! MCP Request → Evolver (blocking pool) → MCP Response
//!     ↓              ↓                        ↓
//! JSON-RPC      patch/evaluate/persist     JSON-RPC
//! over stdio                               over stdio
//! ```
//!
//! # Usage
//!
//! ```bash
//! evolver-mcp
//! ```

mod server;

pub use server::EvolverServer;
