//! MCP tool registry and definitions

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::reasoner::Reasoner;
use crate::{Error, Result};

/// Name of the built-in thinking tool
pub const THINKING_TOOL: &str = "deepseek-r1-thinking";

/// Context passed to tool calls
pub struct ToolContext {
    pub session_id: String,
}

/// Trait for MCP tools
#[async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name (used in tools/call)
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool. Arguments have already been checked against
    /// [`McpTool::input_schema`].
    async fn call(&self, params: Value, ctx: &ToolContext) -> Result<String>;
}

/// Tool metadata in the shape returned by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A tool together with its compiled argument validator
pub struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: jsonschema::Validator,
    tool: Arc<dyn McpTool>,
}

impl RegisteredTool {
    /// Check arguments against the declared input schema
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        let problems: Vec<String> = self
            .validator
            .iter_errors(arguments)
            .map(|e| e.to_string())
            .collect();

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidArguments(problems.join("; ")))
        }
    }

    pub async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<String> {
        self.tool.call(arguments, ctx).await
    }
}

/// Registry of available MCP tools, in registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry with every built-in tool
    pub fn with_builtin_tools(reasoner: Arc<dyn Reasoner>) -> Result<Self> {
        let mut registry = Self::new();
        register_builtin_tools(&mut registry, reasoner)?;
        Ok(registry)
    }

    /// Register a tool, compiling its input schema
    pub fn register(&mut self, tool: Arc<dyn McpTool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }

        let input_schema = tool.input_schema();
        let validator = jsonschema::validator_for(&input_schema).map_err(|e| {
            Error::InvalidSchema {
                tool: name.clone(),
                reason: e.to_string(),
            }
        })?;

        let descriptor = ToolDescriptor {
            name: name.clone(),
            description: tool.description().to_string(),
            input_schema,
        };

        self.index.insert(name, self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            validator,
            tool,
        });
        Ok(())
    }

    /// List all tools in MCP format
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    /// Look up a tool by exact, case-sensitive name
    pub fn resolve(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Get tool count
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ============================================================================
// Built-in tools
// ============================================================================

/// Forwards a query to the reasoning model and returns its thinking
pub struct ThinkingTool {
    reasoner: Arc<dyn Reasoner>,
}

impl ThinkingTool {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl McpTool for ThinkingTool {
    fn name(&self) -> &str {
        THINKING_TOOL
    }

    fn description(&self) -> &str {
        "use deepseek-r1 to think about the problem and return the thinking process. \
         For each question, first use this tool to think through the problem, \
         then provide an answer based on the thinking process."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "the query to think about"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let query = params
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::InvalidArguments("Missing query".to_string()))?;

        // Accepted for compatibility with older clients; file context is not forwarded.
        if params.get("filePaths").is_some() {
            tracing::debug!(session = %ctx.session_id, "Ignoring filePaths argument");
        }

        tracing::debug!(
            session = %ctx.session_id,
            model = self.reasoner.model_name(),
            "Forwarding thinking request"
        );
        let thinking = self.reasoner.think(query).await?;

        Ok(format!("Thinking process: {}", thinking))
    }
}

/// Register built-in deepthink tools
pub fn register_builtin_tools(registry: &mut ToolRegistry, reasoner: Arc<dyn Reasoner>) -> Result<()> {
    registry.register(Arc::new(ThinkingTool::new(reasoner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool(&'static str);

    #[async_trait]
    impl McpTool for EchoTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "echo"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn call(&self, params: Value, _ctx: &ToolContext) -> Result<String> {
            Ok(params.to_string())
        }
    }

    struct FixedReasoner;

    #[async_trait]
    impl Reasoner for FixedReasoner {
        async fn think(&self, query: &str) -> Result<String> {
            Ok(format!("thought about {}", query))
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(Arc::new(EchoTool(name))).unwrap();
        }

        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool("echo"))).unwrap();
        let err = registry.register(Arc::new(EchoTool("echo"))).unwrap_err();
        assert!(matches!(err, Error::DuplicateTool(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        let registry = ToolRegistry::with_builtin_tools(Arc::new(FixedReasoner)).unwrap();
        assert!(registry.resolve(THINKING_TOOL).is_some());
        assert!(registry.resolve("DeepSeek-R1-Thinking").is_none());
        assert!(registry.resolve("").is_none());
    }

    #[test]
    fn test_descriptor_serializes_input_schema_key() {
        let registry = ToolRegistry::with_builtin_tools(Arc::new(FixedReasoner)).unwrap();
        let listed = serde_json::to_value(registry.list()).unwrap();

        assert_eq!(listed[0]["name"], THINKING_TOOL);
        assert_eq!(listed[0]["inputSchema"]["required"], json!(["query"]));
        assert!(listed[0].get("input_schema").is_none());
    }

    #[test]
    fn test_thinking_schema_rejects_missing_and_empty_query() {
        let registry = ToolRegistry::with_builtin_tools(Arc::new(FixedReasoner)).unwrap();
        let tool = registry.resolve(THINKING_TOOL).unwrap();

        assert!(tool.validate(&json!({"query": "why?"})).is_ok());
        assert!(tool.validate(&json!({"query": "why?", "filePaths": ["a.rs"]})).is_ok());
        assert!(matches!(
            tool.validate(&json!({})),
            Err(Error::InvalidArguments(_))
        ));
        assert!(matches!(
            tool.validate(&json!({"query": ""})),
            Err(Error::InvalidArguments(_))
        ));
        assert!(matches!(
            tool.validate(&json!({"query": 42})),
            Err(Error::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_thinking_tool_prefixes_output() {
        let tool = ThinkingTool::new(Arc::new(FixedReasoner));
        let ctx = ToolContext {
            session_id: "s".to_string(),
        };
        let text = tool.call(json!({"query": "2+2"}), &ctx).await.unwrap();
        assert_eq!(text, "Thinking process: thought about 2+2");
    }
}
