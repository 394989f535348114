//! Explicit tool table.
//!
//! Each tool implements [`ToolHandler`] and is registered by name in a
//! [`ToolRegistry`]; dispatch is a table lookup, nothing is discovered
//! implicitly. Handlers call the [`Orchestrator`] directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use adsgate_core::{AccountId, AdsResult, ClassifiedError, MutateOperation};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::context::Orchestrator;

/// Tool description as advertised to the calling assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for input parameters
    pub input_schema: Value,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_schema(&self) -> Value;

    async fn call(&self, orchestrator: &Orchestrator, args: Value) -> AdsResult<Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `run_query` and `batch_mutate`.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.tools.insert(RunQueryTool.name(), Arc::new(RunQueryTool));
        registry
            .tools
            .insert(BatchMutateTool.name(), Arc::new(BatchMutateTool));
        registry
    }

    /// Add a tool. Names are unique.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> AdsResult<()> {
        let name = handler.name();
        if self.tools.contains_key(name) {
            return Err(ClassifiedError::fatal(format!("tool '{}' is already registered", name))
                .with_code("DUPLICATE_TOOL"));
        }
        self.tools.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    pub async fn dispatch(
        &self,
        orchestrator: &Orchestrator,
        name: &str,
        args: Value,
    ) -> AdsResult<Value> {
        let tool = self.get(name).ok_or_else(|| {
            ClassifiedError::validation(format!("unknown tool '{}'", name))
                .with_code("UNKNOWN_TOOL")
                .with_field_path("tool")
        })?;
        debug!(tool = name, "dispatching tool call");
        tool.call(orchestrator, args).await
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> AdsResult<T> {
    serde_json::from_value(args).map_err(|e| {
        ClassifiedError::validation(format!("invalid arguments for {}: {}", tool, e))
            .with_code("INVALID_ARGUMENTS")
    })
}

fn to_output<T: Serialize>(value: &T) -> AdsResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| ClassifiedError::fatal(format!("failed to encode tool output: {}", e)))
}

// ============================================================================
// BUILT-IN TOOLS
// ============================================================================

#[derive(Debug, Deserialize)]
struct RunQueryArgs {
    account_id: AccountId,
    query: String,
}

/// Free-form read-only query, validated before dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunQueryTool;

#[async_trait]
impl ToolHandler for RunQueryTool {
    fn name(&self) -> &'static str {
        "run_query"
    }

    fn description(&self) -> &'static str {
        "Run a read-only query against one account"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "account_id": {
                    "type": "string",
                    "description": "10-digit account id, hyphens allowed"
                },
                "query": {
                    "type": "string",
                    "description": "SELECT ... FROM ... [WHERE ...] [ORDER BY ...] [LIMIT n]"
                }
            },
            "required": ["account_id", "query"]
        })
    }

    async fn call(&self, orchestrator: &Orchestrator, args: Value) -> AdsResult<Value> {
        let args: RunQueryArgs = parse_args(self.name(), args)?;
        let outcome = orchestrator.run_query(&args.account_id, &args.query).await?;
        let row_count = outcome.rows.len();
        let mut output = to_output(&outcome)?;
        if let Some(map) = output.as_object_mut() {
            map.insert("row_count".to_string(), json!(row_count));
        }
        Ok(output)
    }
}

#[derive(Debug, Deserialize)]
struct BatchMutateArgs {
    account_id: AccountId,
    operations: Vec<MutateOperation>,
    #[serde(default)]
    dry_run: bool,
}

/// Structured bulk mutation with per-item outcomes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchMutateTool;

#[async_trait]
impl ToolHandler for BatchMutateTool {
    fn name(&self) -> &'static str {
        "batch_mutate"
    }

    fn description(&self) -> &'static str {
        "Apply independent create/update/remove operations; reports per-item success"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "account_id": { "type": "string" },
                "operations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "resource": { "type": "string" },
                            "action": { "type": "string", "enum": ["create", "update", "remove"] },
                            "resource_name": { "type": "string" },
                            "payload": { "type": "object" }
                        },
                        "required": ["resource", "action"]
                    }
                },
                "dry_run": {
                    "type": "boolean",
                    "description": "Validate only; nothing is applied",
                    "default": false
                }
            },
            "required": ["account_id", "operations"]
        })
    }

    async fn call(&self, orchestrator: &Orchestrator, args: Value) -> AdsResult<Value> {
        let args: BatchMutateArgs = parse_args(self.name(), args)?;
        let result = orchestrator
            .mutate(&args.account_id, args.operations, args.dry_run)
            .await?;
        to_output(&result)
    }
}
