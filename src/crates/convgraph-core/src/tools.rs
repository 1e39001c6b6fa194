//! Tool execution for agent loops
//!
//! The agent node answers with an assistant message carrying
//! [`ToolCall`]s; [`tools_condition`] routes to the tool node while calls are
//! outstanding, and [`ToolNode`] answers every call with a tool message
//! before handing control back to the agent:
//!
//! ```text
//! __start__ -> agent --(tool_calls)--> tools
//!                ^  \--(no calls)----> __end__
//!                |                       |
//!                +-----------------------+
//! ```
//!
//! ```rust
//! use convgraph_core::tools::{tools_condition, ToolNode, TOOLS};
//! use convgraph_core::{StateGraph, StateSchema, END, START};
//! # use convgraph_core::{Message, StateUpdate, State};
//! # async fn agent(_s: State) -> convgraph_core::node::NodeResult {
//! #     Ok(StateUpdate::new().message(Message::assistant("done")).into())
//! # }
//!
//! let tools = ToolNode::new().with_tool("get_weather_info", |args| {
//!     let query = args["query"].as_str().unwrap_or_default().to_lowercase();
//!     Ok(if query.contains("sf") { "It's 60 degrees and foggy." } else { "It's 90 degrees and sunny." }.to_string())
//! });
//!
//! let mut graph = StateGraph::new(StateSchema::messages());
//! graph.add_node("agent", agent).unwrap();
//! graph.add_tool_node(TOOLS, tools).unwrap();
//! graph.add_edge(START, "agent").unwrap();
//! graph.add_conditional_edge("agent", tools_condition, [TOOLS, END]).unwrap();
//! graph.add_edge(TOOLS, "agent").unwrap();
//! assert!(graph.compile().is_ok());
//! ```

use crate::error::NodeError;
use crate::graph::END;
use crate::messages::{Message, ToolCall};
use crate::node::{NodeOutcome, NodeResult};
use crate::state::{State, StateUpdate};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Conventional name of the tool node
pub const TOOLS: &str = "tools";

/// A registered tool: JSON arguments in, text result out
pub type ToolFn = Arc<dyn Fn(Value) -> Result<String, NodeError> + Send + Sync>;

/// Route to [`TOOLS`] while the last message has pending tool calls
pub fn tools_condition(state: &State) -> &'static str {
    match state.last_message() {
        Ok(Some(message)) if message.has_tool_calls() => TOOLS,
        _ => END,
    }
}

/// Node that answers the last assistant message's tool calls
#[derive(Clone)]
pub struct ToolNode {
    tools: BTreeMap<String, ToolFn>,
    /// Report tool failures to the model instead of failing the run
    handle_errors: bool,
}

impl fmt::Debug for ToolNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolNode")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("handle_errors", &self.handle_errors)
            .finish()
    }
}

impl Default for ToolNode {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolNode {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            handle_errors: true,
        }
    }

    pub fn with_tool<F>(mut self, name: impl Into<String>, tool: F) -> Self
    where
        F: Fn(Value) -> Result<String, NodeError> + Send + Sync + 'static,
    {
        self.tools.insert(name.into(), Arc::new(tool));
        self
    }

    /// With `false`, a failing or unknown tool fails the node
    pub fn with_error_handling(mut self, handle_errors: bool) -> Self {
        self.handle_errors = handle_errors;
        self
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Run every call of the last message, one tool message per call
    pub async fn execute(&self, state: State) -> NodeResult {
        let last = state
            .last_message()?
            .filter(Message::has_tool_calls)
            .ok_or("tool node invoked without pending tool calls")?;

        let mut update = StateUpdate::new();
        for call in &last.tool_calls {
            let content = self.call(call)?;
            update = update.message(Message::tool_result(content, call.id.as_str()));
        }
        Ok(NodeOutcome::Continue(update))
    }

    fn call(&self, call: &ToolCall) -> Result<String, NodeError> {
        let result = match self.tools.get(&call.name) {
            Some(tool) => tool(call.args.clone()),
            None => Err(format!("unknown tool '{}'", call.name).into()),
        };

        match result {
            Ok(content) => {
                debug!(tool = %call.name, call_id = %call.id, "Tool call finished");
                Ok(content)
            }
            Err(e) if self.handle_errors => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
                Ok(format!("Error: {e}"))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather() -> ToolNode {
        ToolNode::new().with_tool("get_weather_info", |args: Value| {
            let query = args["query"].as_str().ok_or("missing query")?.to_lowercase();
            Ok(if query.contains("sf") || query.contains("san francisco") {
                "It's 60 degrees and foggy.".to_string()
            } else {
                "It's 90 degrees and sunny.".to_string()
            })
        })
    }

    fn state(messages: Vec<Message>) -> State {
        let values: Vec<Value> = messages.iter().map(Message::to_value).collect();
        State::from(json!({ "messages": values }).as_object().cloned().unwrap())
    }

    fn calling(calls: Vec<ToolCall>) -> State {
        state(vec![
            Message::user("what is the weather in san francisco"),
            Message::assistant("").with_tool_calls(calls),
        ])
    }

    fn answers(outcome: NodeOutcome) -> Vec<Message> {
        match outcome {
            NodeOutcome::Continue(update) => {
                serde_json::from_value(update.get("messages").cloned().unwrap()).unwrap()
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_tools_condition() {
        let pending = calling(vec![ToolCall::new("1", "get_weather_info", json!({}))]);
        assert_eq!(tools_condition(&pending), TOOLS);

        let answered = state(vec![Message::user("hi"), Message::assistant("hello")]);
        assert_eq!(tools_condition(&answered), END);
        assert_eq!(tools_condition(&State::new()), END);
    }

    #[tokio::test]
    async fn test_answers_each_call() {
        let outcome = weather()
            .execute(calling(vec![
                ToolCall::new("call_1", "get_weather_info", json!({"query": "sf"})),
                ToolCall::new("call_2", "get_weather_info", json!({"query": "ny"})),
            ]))
            .await
            .unwrap();

        let messages = answers(outcome);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[0].content, "It's 60 degrees and foggy.");
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(messages[1].content, "It's 90 degrees and sunny.");
    }

    #[tokio::test]
    async fn test_failures_are_reported_to_the_model() {
        let outcome = weather()
            .execute(calling(vec![
                ToolCall::new("call_1", "get_weather_info", json!({})),
                ToolCall::new("call_2", "search_web", json!({"query": "rust"})),
            ]))
            .await
            .unwrap();

        let messages = answers(outcome);
        assert_eq!(messages[0].content, "Error: missing query");
        assert_eq!(messages[1].content, "Error: unknown tool 'search_web'");
    }

    #[tokio::test]
    async fn test_strict_mode_fails_the_node() {
        let err = weather()
            .with_error_handling(false)
            .execute(calling(vec![ToolCall::new("call_1", "search_web", json!({}))]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown tool 'search_web'");
    }

    #[tokio::test]
    async fn test_no_pending_calls_is_error() {
        let result = weather()
            .execute(state(vec![Message::assistant("all done")]))
            .await;
        assert!(result.is_err());
    }
}
