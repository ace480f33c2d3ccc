//! MCP server implementation for evolver.
//!
//! Each tool call runs synchronously on tokio's blocking pool: evaluations
//! are CPU-bound or wait on a child process, and redb transactions block.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ErrorCode, ErrorData as McpError, *},
    tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorResponse, Result};
use crate::orchestrator::Evolver;

#[derive(Clone)]
pub struct EvolverServer {
    evolver: Arc<Evolver>,
    tool_router: ToolRouter<EvolverServer>,
}

impl std::fmt::Debug for EvolverServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvolverServer").finish_non_exhaustive()
    }
}

/// Request parameters for the start_evolution tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StartRequest {
    #[schemars(description = "Problem to tune: world_gen or crop_economy")]
    pub problem_id: String,

    #[schemars(description = "Directory where the final result of the run is written")]
    pub output_location: String,
}

/// Request parameters for the step_evolution tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StepRequest {
    #[schemars(description = "state_id returned by start_evolution")]
    pub state_id: String,

    #[schemars(
        description = "Your full reply to the last prompt. The last ```json block in it is applied as a patch."
    )]
    pub response: String,

    #[schemars(description = "Iteration cap for this session (default: 10)")]
    pub max_iterations: Option<u32>,
}

#[tool_router]
impl EvolverServer {
    pub fn new(evolver: Arc<Evolver>) -> Self {
        Self {
            evolver,
            tool_router: Self::tool_router(),
        }
    }

    /// Start a session: evaluate the problem's initial parameters and return
    /// the first prompt.
    #[tool(
        name = "start_evolution",
        description = "Start tuning a game-content problem. Returns a state_id, the current score and failures, and a prompt describing what to change. Answer the prompt and pass your reply to step_evolution."
    )]
    async fn start_evolution(
        &self,
        Parameters(request): Parameters<StartRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run(move |evo| evo.start(&request.problem_id, &request.output_location))
            .await
    }

    /// Apply one proposed parameter change and score it.
    #[tool(
        name = "step_evolution",
        description = "Submit your reply to the last prompt. The parameter patch in its last ```json block is merged onto the best parameters so far and scored. Returns the next prompt, or a final result with done=true once max_iterations is reached."
    )]
    async fn step_evolution(
        &self,
        Parameters(request): Parameters<StepRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run(move |evo| evo.step(&request.state_id, &request.response, request.max_iterations))
            .await
    }

    #[tool(name = "list_problems", description = "List the problems that can be tuned.")]
    async fn list_problems(&self) -> Result<CallToolResult, McpError> {
        self.run(|evo| Ok(evo.problems())).await
    }
}

impl EvolverServer {
    async fn run<T, F>(&self, call: F) -> Result<CallToolResult, McpError>
    where
        T: Serialize + Send + 'static,
        F: FnOnce(&Evolver) -> Result<T> + Send + 'static,
    {
        let evolver = Arc::clone(&self.evolver);
        let outcome = tokio::task::spawn_blocking(move || call(&evolver))
            .await
            .map_err(|e| McpError {
                code: ErrorCode(-32603),
                message: Cow::from(format!("Tool call panicked: {}", e)),
                data: None,
            })?;
        tool_result(outcome)
    }
}

/// Domain errors are tool-level errors carrying `{error, kind, hint}` so the
/// caller can act on them. Only serialization failures are protocol errors.
fn tool_result<T: Serialize>(outcome: Result<T>) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(value) => Ok(CallToolResult::success(vec![Content::text(to_json(&value)?)])),
        Err(e) => {
            tracing::debug!(kind = e.kind(), error = %e, "tool call failed");
            let body = ErrorResponse::from(&e);
            Ok(CallToolResult::error(vec![Content::text(to_json(&body)?)]))
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, McpError> {
    serde_json::to_string_pretty(value).map_err(|e| McpError {
        code: ErrorCode(-32603),
        message: Cow::from(format!("JSON serialization failed: {}", e)),
        data: None,
    })
}

#[tool_handler]
impl ServerHandler for EvolverServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "evolver".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            instructions: Some(
                "Iteratively tunes game-content parameters. Call start_evolution, answer the \
                 returned prompt with a ```json patch, and pass the answer to step_evolution \
                 until it returns done=true."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::EvolverError;
    use crate::oracle::ScoringOracle;
    use crate::problems::Registry;
    use crate::store::MemorySessionStore;

    fn server() -> EvolverServer {
        let registry = Registry::new(ScoringOracle::native(Duration::from_secs(30)));
        EvolverServer::new(Arc::new(Evolver::new(registry, Arc::new(MemorySessionStore::new()))))
    }

    fn text(result: &CallToolResult) -> String {
        serde_json::to_value(&result.content[0]).unwrap()["text"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_server_creation() {
        let info = server().get_info();
        assert_eq!(info.server_info.name, "evolver");
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn test_errors_become_structured_tool_errors() {
        let result = tool_result::<()>(Err(EvolverError::PatchParse("nothing".into()))).unwrap();
        assert_eq!(result.is_error, Some(true));
        let body: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(body["kind"], "patch_parse_error");
        assert!(body["hint"].as_str().unwrap().contains("```json"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_goes_through_blocking_pool() {
        let server = server();
        let result = server.run(|evo| Ok(evo.problems())).await.unwrap();
        assert_ne!(result.is_error, Some(true));
        let body: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(body[0]["id"], "world_gen");
        assert_eq!(body[1]["id"], "crop_economy");
    }
}
