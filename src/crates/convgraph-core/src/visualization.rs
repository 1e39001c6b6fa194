//! Mermaid rendering of a graph structure
//!
//! ```text
//! graph TD
//!     START((START))
//!     END((END))
//!     initial_support{"initial_support"}
//!     billing_support{"billing_support"}
//!     handle_refund["handle_refund"]
//!     START --> initial_support
//!     initial_support -."billing_support"..-> billing_support
//!     ...
//! ```
//!
//! Nodes with a conditional edge are drawn as diamonds, nodes listed in
//! `interrupt_before` get a dashed red border. Output is deterministic:
//! nodes appear in registration order and edges in declaration order, so
//! the text can be committed and diffed.

use crate::graph::{Edge, Graph, END, START};

const START_STYLE: &str = "fill:#90EE90,stroke:#228B22,stroke-width:3px";
const END_STYLE: &str = "fill:#FFB6C1,stroke:#DC143C,stroke-width:3px";
const NODE_STYLE: &str = "fill:#F0F0F0,stroke:#666,stroke-width:2px";
const CONDITIONAL_STYLE: &str = "fill:#FFE4B5,stroke:#FF8C00,stroke-width:2px";
const INTERRUPT_STYLE: &str = "stroke:#DC143C,stroke-width:2px,stroke-dasharray:5 5";

/// Render `graph` as a Mermaid flowchart
pub fn to_mermaid(graph: &Graph) -> String {
    let mut output = String::from("graph TD\n");

    output.push_str(&format!("    {}((START))\n", sanitize_id(START)));
    output.push_str(&format!("    style {} {START_STYLE}\n", sanitize_id(START)));
    output.push_str(&format!("    {}((END))\n", sanitize_id(END)));
    output.push_str(&format!("    style {} {END_STYLE}\n", sanitize_id(END)));

    for name in graph.node_names() {
        let id = sanitize_id(name);
        let label = escape_mermaid(name);
        if matches!(graph.edge(name), Some(Edge::Conditional(_))) {
            output.push_str(&format!("    {id}{{\"{label}\"}}\n"));
            output.push_str(&format!("    style {id} {CONDITIONAL_STYLE}\n"));
        } else {
            output.push_str(&format!("    {id}[\"{label}\"]\n"));
            output.push_str(&format!("    style {id} {NODE_STYLE}\n"));
        }
    }

    for name in graph.interrupt_before() {
        output.push_str(&format!("    style {} {INTERRUPT_STYLE}\n", sanitize_id(name)));
    }

    let sources = std::iter::once(START).chain(graph.node_names());
    for from in sources {
        match graph.edge(from) {
            Some(Edge::Static(targets)) => {
                for to in targets {
                    output.push_str(&format!(
                        "    {} --> {}\n",
                        sanitize_id(from),
                        sanitize_id(to)
                    ));
                }
            }
            Some(Edge::Conditional(router)) => {
                for to in router.valid_targets() {
                    output.push_str(&format!(
                        "    {} -.\"{}\"..-> {}\n",
                        sanitize_id(from),
                        escape_mermaid(to),
                        sanitize_id(to)
                    ));
                }
            }
            None => {}
        }
    }

    output
}

/// Escape special characters for Mermaid labels
fn escape_mermaid(s: &str) -> String {
    s.replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Mermaid ids: alphanumeric and underscore only; lowercase `end` is a keyword
fn sanitize_id(s: &str) -> String {
    match s {
        START => return "START".to_string(),
        END => return "END".to_string(),
        _ => {}
    }
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
