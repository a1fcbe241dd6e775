//! Built-in flow networks

use super::{EdgeDocument, GraphDefinition, VertexDocument};

pub const SIMPLE_NETWORK_FLOW_GRAPH: &str = "SimpleNetworkFlowGraph";
pub const DIAMOND: &str = "Diamond";

/// Names of all fixtures
pub const FIXTURES: [&str; 2] = [SIMPLE_NETWORK_FLOW_GRAPH, DIAMOND];

fn network(name: &str, vertices: &[&str], edges: &[(&str, &str, &str, f64)]) -> GraphDefinition {
    GraphDefinition {
        name: name.to_string(),
        vertex_collection: format!("{}_V", name),
        edge_collection: format!("{}_E", name),
        vertices: vertices.iter().map(|key| VertexDocument::new(*key)).collect(),
        edges: edges
            .iter()
            .map(|(key, from, to, capacity)| EdgeDocument::new(*key, *from, *to, *capacity))
            .collect(),
    }
}

/// The textbook six-vertex network, max flow 23 from `s` to `t`
pub fn simple_network_flow_graph() -> GraphDefinition {
    network(
        SIMPLE_NETWORK_FLOW_GRAPH,
        &["s", "v1", "v2", "v3", "v4", "t"],
        &[
            ("e1", "s", "v1", 16.0),
            ("e2", "s", "v2", 13.0),
            ("e3", "v2", "v1", 4.0),
            ("e4", "v1", "v3", 12.0),
            ("e5", "v3", "v2", 9.0),
            ("e6", "v2", "v4", 14.0),
            ("e7", "v4", "v3", 7.0),
            ("e8", "v3", "t", 20.0),
            ("e9", "v4", "t", 4.0),
        ],
    )
}

/// Two unit paths from `s` to `t`, max flow 2
pub fn diamond() -> GraphDefinition {
    network(
        DIAMOND,
        &["s", "a", "b", "t"],
        &[
            ("sa", "s", "a", 1.0),
            ("sb", "s", "b", 1.0),
            ("at", "a", "t", 1.0),
            ("bt", "b", "t", 1.0),
        ],
    )
}

pub fn fixture(name: &str) -> Option<GraphDefinition> {
    match name {
        SIMPLE_NETWORK_FLOW_GRAPH => Some(simple_network_flow_graph()),
        DIAMOND => Some(diamond()),
        _ => None,
    }
}
