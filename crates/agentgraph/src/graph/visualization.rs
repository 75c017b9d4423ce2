//! Mermaid diagram generation for agent graphs
//!
//! # Node Shapes
//!
//! | Kind        | Shape             | Mermaid Syntax |
//! |-------------|-------------------|----------------|
//! | endpoint    | Stadium           | `id([label])`  |
//! | async       | Parallelogram     | `id[/label\]`  |
//! | await       | Reverse Para.     | `id[\label/]`  |
//! | for_each    | Hexagon           | `id{{label}}`  |
//! | logic       | Diamond           | `id{label}`    |
//! | variable    | Cylinder          | `id[(label)]`  |
//! | passthrough | Rounded Rectangle | `id(label)`    |
//! | other       | Rectangle         | `id[label]`    |

use super::model::{AgentGraph, Connection};
use crate::component::kinds;
use crate::engine::snapshot::{ComponentStatus, Snapshot};

// ============================================================================
// ID Sanitization
// ============================================================================

/// Sanitize a component ID for use as a Mermaid node identifier.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

// ============================================================================
// Node Rendering
// ============================================================================

/// Render a node with the Mermaid shape of its component kind.
pub fn render_node(id: &str, kind: &str) -> String {
    let safe_id = sanitize_id(id);
    let label = format!("{}: {}", id, kind);

    match kind {
        kinds::ENDPOINT => format!("    {}([{}])", safe_id, label),
        kinds::FORK => format!("    {}[/{}\\]", safe_id, label),
        kinds::JOIN => format!("    {}[\\{}/]", safe_id, label),
        kinds::FOR_EACH => format!("    {}{{{{{}}}}}", safe_id, label),
        kinds::LOGIC => format!("    {}{{{}}}", safe_id, label),
        kinds::VARIABLE => format!("    {}[({})]", safe_id, label),
        kinds::PASSTHROUGH => format!("    {}({})", safe_id, label),
        _ => format!("    {}[{}]", safe_id, label),
    }
}

/// Render a node with a status class for coloring.
pub fn render_node_with_status(id: &str, kind: &str, status: Option<ComponentStatus>) -> String {
    let base = render_node(id, kind);
    match status {
        Some(ComponentStatus::Waiting) => format!("{}:::waiting", base),
        Some(ComponentStatus::InProgress) => format!("{}:::in_progress", base),
        Some(ComponentStatus::Done) => format!("{}:::done", base),
        Some(ComponentStatus::Failed) => format!("{}:::failed", base),
        Some(ComponentStatus::Idle) | None => base,
    }
}

// ============================================================================
// Edge Rendering
// ============================================================================

/// Render a connection, labelled with its port names.
pub fn render_connection(graph: &AgentGraph, connection: &Connection) -> String {
    let from = sanitize_id(connection.source.as_str());
    let to = sanitize_id(connection.target.as_str());

    let source_port = graph
        .component(&connection.source)
        .and_then(|c| c.outputs.get(connection.source_port))
        .map(|p| p.name.as_str())
        .unwrap_or("?");
    let target_port = graph
        .component(&connection.target)
        .and_then(|c| c.inputs.get(connection.target_port))
        .map(|p| p.name.as_str())
        .unwrap_or("?");

    if source_port == crate::graph::ERROR_PORT {
        format!("    {} -. \"{} → {}\" .-> {}", from, source_port, target_port, to)
    } else {
        format!("    {} -- \"{} → {}\" --> {}", from, source_port, target_port, to)
    }
}

// ============================================================================
// Style Definitions
// ============================================================================

/// CSS class definitions for component statuses.
pub const STYLE_DEFS: &str = r#"
    classDef waiting fill:#FFE4B5,stroke:#FF8C00,stroke-width:1px
    classDef in_progress fill:#90EE90,stroke:#228B22,stroke-width:2px
    classDef done fill:#D3D3D3,stroke:#696969,stroke-width:1px
    classDef failed fill:#F08080,stroke:#B22222,stroke-width:2px
"#;

// ============================================================================
// Whole-graph Rendering
// ============================================================================

/// Render the graph as a Mermaid flowchart.
pub fn to_mermaid(graph: &AgentGraph) -> String {
    render(graph, None)
}

/// Render the graph with the component statuses of a session snapshot.
pub fn to_mermaid_with_state(graph: &AgentGraph, snapshot: &Snapshot) -> String {
    render(graph, Some(snapshot))
}

fn render(graph: &AgentGraph, snapshot: Option<&Snapshot>) -> String {
    let mut lines = vec!["flowchart LR".to_string()];

    for component in graph.components() {
        let status = snapshot
            .and_then(|s| s.states.get(&component.id))
            .map(|state| state.status);
        lines.push(render_node_with_status(
            component.id.as_str(),
            &component.kind,
            status,
        ));
    }

    for connection in graph.connections() {
        lines.push(render_connection(graph, connection));
    }

    if snapshot.is_some() {
        lines.push(STYLE_DEFS.trim_end().to_string());
    }

    lines.join("\n")
}
