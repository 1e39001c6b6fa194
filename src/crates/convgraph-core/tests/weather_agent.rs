//! Agent/tool loop: the agent requests a weather lookup, the tool node
//! answers, and the agent replies with the result

use convgraph_core::node::NodeResult;
use convgraph_core::tools::{tools_condition, ToolNode, TOOLS};
use convgraph_core::{
    CompiledGraph, Message, MessageRole, RunEvent, RunStatus, State, StateGraph, StateSchema,
    StateUpdate, ToolCall, END, START,
};
use futures::StreamExt;
use serde_json::{json, Value};

/// Scripted model: look up the weather for a question, then relay the answer
async fn agent(state: State) -> NodeResult {
    let messages = state.messages()?;
    let last = messages.last().ok_or("agent invoked without messages")?;

    let reply = match last.role {
        MessageRole::User => Message::assistant("").with_tool_calls(vec![ToolCall::new(
            format!("call_{}", messages.len()),
            "get_weather_info",
            json!({ "query": last.content }),
        )]),
        _ => Message::assistant(last.content.clone()),
    };
    Ok(StateUpdate::new().message(reply).into())
}

fn weather(args: Value) -> Result<String, convgraph_core::NodeError> {
    let query = args["query"].as_str().ok_or("missing query")?.to_lowercase();
    Ok(if query.contains("sf") || query.contains("san francisco") {
        "It's 60 degrees and foggy.".to_string()
    } else {
        "It's 90 degrees and sunny.".to_string()
    })
}

fn weather_agent() -> CompiledGraph {
    let mut graph = StateGraph::new(StateSchema::messages());
    graph.add_node("agent", agent).unwrap();
    graph
        .add_tool_node(TOOLS, ToolNode::new().with_tool("get_weather_info", weather))
        .unwrap();
    graph.add_edge(START, "agent").unwrap();
    graph
        .add_conditional_edge("agent", tools_condition, [TOOLS, END])
        .unwrap();
    graph.add_edge(TOOLS, "agent").unwrap();
    graph.compile().unwrap()
}

fn user(text: &str) -> Option<StateUpdate> {
    Some(StateUpdate::new().message(Message::user(text)))
}

#[tokio::test]
async fn agent_calls_tool_then_answers() {
    let app = weather_agent();

    let events: Vec<RunEvent> = app
        .run("abcdefgh", user("what is the weather in san francisco"))
        .map(|e| e.unwrap())
        .collect()
        .await;
    let nodes: Vec<&str> = events.iter().map(RunEvent::node).collect();
    assert_eq!(nodes, vec!["agent", TOOLS, "agent"]);

    let snapshot = app.get_state("abcdefgh").await.unwrap().unwrap();
    assert!(snapshot.tasks.is_empty());

    let messages = snapshot.values.messages().unwrap();
    let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant
        ]
    );
    assert_eq!(messages[2].tool_call_id, Some(messages[1].tool_calls[0].id.clone()));
    assert_eq!(messages[3].content, "It's 60 degrees and foggy.");
}

#[tokio::test]
async fn second_turn_reuses_the_thread() {
    let app = weather_agent();
    app.invoke("abcdefgh", user("what is the weather in sf"))
        .await
        .unwrap();

    let outcome = app.invoke("abcdefgh", user("what about ny")).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    let messages = outcome.values.messages().unwrap();
    assert_eq!(messages.len(), 8);
    assert_eq!(messages[3].content, "It's 60 degrees and foggy.");
    assert_eq!(messages[7].content, "It's 90 degrees and sunny.");

    // each turn's tool answer points at that turn's call
    let call_ids: Vec<&str> = messages
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(call_ids, vec!["call_1", "call_5"]);
}

#[tokio::test]
async fn failing_tool_is_reported_to_the_agent() {
    let mut graph = StateGraph::new(StateSchema::messages());
    graph.add_node("agent", agent).unwrap();
    graph
        .add_tool_node(
            TOOLS,
            ToolNode::new().with_tool("get_weather_info", |_args: Value| {
                Err("weather service unavailable".into())
            }),
        )
        .unwrap();
    graph.add_edge(START, "agent").unwrap();
    graph
        .add_conditional_edge("agent", tools_condition, [TOOLS, END])
        .unwrap();
    graph.add_edge(TOOLS, "agent").unwrap();
    let app = graph.compile().unwrap();

    let outcome = app.invoke("t", user("weather in sf?")).await.unwrap();
    let last = outcome.values.last_message().unwrap().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert_eq!(last.content, "Error: weather service unavailable");
}

#[test]
fn mermaid_shows_the_loop() {
    let mermaid = weather_agent().to_mermaid();
    assert!(mermaid.contains("tools --> agent"), "{mermaid}");
    assert!(mermaid.contains("agent -.\"tools\"..-> tools"), "{mermaid}");
}
