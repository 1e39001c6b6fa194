//! Durable checkpoints, restarts and abandoned runs

use convgraph_core::checkpoint::{CheckpointSaver, FileCheckpointSaver};
use convgraph_core::node::NodeResult;
use convgraph_core::{
    CheckpointBackend, CheckpointFormat, CompiledGraph, EngineConfig, Message, NodeOutcome,
    OverwriteReducer, RunEvent, RunStatus, State, StateGraph, StateSchema, StateUpdate, END,
    START,
};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;

fn reply(text: &'static str) -> NodeResult {
    Ok(StateUpdate::new().message(Message::assistant(text)).into())
}

async fn approve(state: State) -> NodeResult {
    if state.get_bool("approved") == Some(true) {
        reply("approved")
    } else {
        Ok(NodeOutcome::suspend("awaiting approval"))
    }
}

fn graph() -> StateGraph {
    let schema = StateSchema::messages().with_field("approved", OverwriteReducer);
    let mut graph = StateGraph::new(schema);
    graph.add_node("draft", |_s: State| async { reply("draft") }).unwrap();
    graph.add_node("review", |_s: State| async { reply("review") }).unwrap();
    graph.add_node("approve", approve).unwrap();
    graph.add_edge(START, "draft").unwrap();
    graph.add_edge("draft", "review").unwrap();
    graph.add_edge("review", "approve").unwrap();
    graph.add_edge("approve", END).unwrap();
    graph
}

fn file_app(dir: &Path, format: CheckpointFormat) -> CompiledGraph {
    let config = EngineConfig::default().with_checkpoint(CheckpointBackend::File {
        dir: dir.to_path_buf(),
        format,
    });
    graph().compile_with_config(&config).unwrap()
}

fn user(text: &str) -> Option<StateUpdate> {
    Some(StateUpdate::new().message(Message::user(text)))
}

#[tokio::test]
async fn suspended_thread_survives_restart() {
    for format in [CheckpointFormat::Json, CheckpointFormat::Bincode] {
        let dir = tempfile::tempdir().unwrap();

        let outcome = file_app(dir.path(), format)
            .invoke("thread-1", user("ship it"))
            .await
            .unwrap();
        assert!(outcome.is_interrupted());

        // a fresh engine over the same directory picks the thread up
        let app = file_app(dir.path(), format);
        let snapshot = app.get_state("thread-1").await.unwrap().unwrap();
        assert_eq!(snapshot.next, vec!["approve"]);
        assert_eq!(snapshot.version, outcome.version);

        app.update_state("thread-1", StateUpdate::new().set("approved", true))
            .await
            .unwrap();
        let outcome = app.invoke("thread-1", None).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);

        let contents: Vec<String> = outcome
            .values
            .messages()
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["ship it", "draft", "review", "approved"]);
    }
}

#[tokio::test]
async fn dropped_stream_resumes_from_last_step() {
    let dir = tempfile::tempdir().unwrap();
    let app = file_app(dir.path(), CheckpointFormat::Json);

    let mut events = app.run("thread-1", user("go"));
    let first = events.next().await.unwrap().unwrap();
    assert_eq!(first.node(), "draft");
    drop(events);

    let snapshot = app.get_state("thread-1").await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["review"]);

    let rest: Vec<RunEvent> = app
        .run("thread-1", None)
        .map(|e| e.unwrap())
        .collect()
        .await;
    let nodes: Vec<&str> = rest.iter().map(RunEvent::node).collect();
    assert_eq!(nodes, vec!["review", "approve"]);
}

#[tokio::test]
async fn versions_are_dense_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let saver = Arc::new(FileCheckpointSaver::json(dir.path()));
    let app = graph().compile().unwrap().with_checkpointer(saver.clone());

    app.invoke("thread-1", user("go")).await.unwrap();
    app.update_state("thread-1", StateUpdate::new().set("approved", true))
        .await
        .unwrap();
    app.invoke("thread-1", None).await.unwrap();

    let versions: Vec<u64> = saver
        .list("thread-1", None)
        .await
        .unwrap()
        .map(|c| c.unwrap().version)
        .collect()
        .await;
    assert_eq!(versions, vec![6, 5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn concurrent_threads_share_one_directory() {
    let dir = tempfile::tempdir().unwrap();
    let app = file_app(dir.path(), CheckpointFormat::Bincode);

    let runs = (0..8).map(|i| {
        let app = app.clone();
        tokio::spawn(async move { app.invoke(format!("thread-{i}"), user("go")).await })
    });
    for handle in futures::future::join_all(runs).await {
        assert!(handle.unwrap().unwrap().is_interrupted());
    }

    for i in 0..8 {
        let snapshot = app.get_state(&format!("thread-{i}")).await.unwrap().unwrap();
        assert_eq!(snapshot.version, 4);
    }
}
