//! Graph store
//!
//! Named graphs of vertex and edge documents. A graph is validated once
//! when it is loaded; runs read it through [`Graph::residual_edges`] and
//! write their result field back with [`GraphStore::write_results`].

pub mod fixtures;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::pregel::VertexId;

/// Suffix of synthetic reverse residual edges
pub const REVERSE_SUFFIX: &str = "/reverse";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph not found: {0}")]
    NotFound(String),

    #[error("Graph already exists: {0}")]
    AlreadyExists(String),

    #[error("Duplicate vertex {0}")]
    DuplicateVertex(String),

    #[error("Duplicate edge {0}")]
    DuplicateEdge(String),

    #[error("Edge {edge} references unknown vertex {vertex}")]
    UnknownEndpoint { edge: String, vertex: String },

    #[error("Edge {0} is a self-loop")]
    SelfLoop(String),

    #[error("Edge {edge} is parallel to {existing} ({from} -> {to})")]
    ParallelEdge {
        edge: String,
        existing: String,
        from: String,
        to: String,
    },

    #[error("Edge {edge} has invalid capacity {capacity}")]
    InvalidCapacity { edge: String, capacity: f64 },

    #[error("Failed to read graph file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse graph: {0}")]
    Parse(#[from] serde_json::Error),
}

fn default_vertex_collection() -> String {
    "nodes".to_string()
}

fn default_edge_collection() -> String {
    "edges".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexDocument {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl VertexDocument {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attributes: serde_json::Map::new(),
        }
    }
}

/// Edge document; `_from`/`_to` are vertex keys or full `collection/key` ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDocument {
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "_from")]
    pub from: String,
    #[serde(rename = "_to")]
    pub to: String,
    pub capacity: f64,
}

impl EdgeDocument {
    pub fn new(key: impl Into<String>, from: impl Into<String>, to: impl Into<String>, capacity: f64) -> Self {
        Self {
            key: Some(key.into()),
            from: from.into(),
            to: to.into(),
            capacity,
        }
    }
}

/// A graph as submitted or stored in a fixture file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDefinition {
    pub name: String,
    #[serde(default = "default_vertex_collection")]
    pub vertex_collection: String,
    #[serde(default = "default_edge_collection")]
    pub edge_collection: String,
    pub vertices: Vec<VertexDocument>,
    pub edges: Vec<EdgeDocument>,
}

impl GraphDefinition {
    pub fn from_json_str(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load_file(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&json)
    }
}

/// A validated edge
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,
    pub from: VertexId,
    pub to: VertexId,
    pub capacity: f64,
}

/// One outgoing residual edge of a vertex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualEdge {
    pub to: VertexId,
    pub id: String,
    pub capacity: f64,
}

/// A validated graph
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    vertices: BTreeMap<VertexId, VertexDocument>,
    edges: Vec<Edge>,
}

impl Graph {
    /// Validate a definition.
    ///
    /// Rejects duplicate vertices and edges, dangling endpoints, self-loops,
    /// parallel edges between the same ordered pair and capacities that are
    /// negative or not finite.
    pub fn from_definition(definition: GraphDefinition) -> Result<Self, GraphError> {
        let collection = &definition.vertex_collection;
        let mut vertices = BTreeMap::new();
        for document in definition.vertices {
            let id = VertexId::new(format!("{}/{}", collection, document.key));
            if vertices.insert(id.clone(), document).is_some() {
                return Err(GraphError::DuplicateVertex(id.0));
            }
        }

        let resolve = |edge: &str, endpoint: &str| {
            let id = if endpoint.contains('/') {
                VertexId::new(endpoint)
            } else {
                VertexId::new(format!("{}/{}", collection, endpoint))
            };
            if vertices.contains_key(&id) {
                Ok(id)
            } else {
                Err(GraphError::UnknownEndpoint {
                    edge: edge.to_string(),
                    vertex: endpoint.to_string(),
                })
            }
        };

        let mut edges = Vec::with_capacity(definition.edges.len());
        let mut ids = BTreeSet::new();
        let mut pairs: HashMap<(VertexId, VertexId), String> = HashMap::new();

        for (index, document) in definition.edges.iter().enumerate() {
            let key = document.key.clone().unwrap_or_else(|| format!("e{}", index));
            let id = format!("{}/{}", definition.edge_collection, key);
            if !ids.insert(id.clone()) {
                return Err(GraphError::DuplicateEdge(id));
            }

            let from = resolve(&id, &document.from)?;
            let to = resolve(&id, &document.to)?;
            if from == to {
                return Err(GraphError::SelfLoop(id));
            }
            if !document.capacity.is_finite() || document.capacity < 0.0 {
                return Err(GraphError::InvalidCapacity {
                    edge: id,
                    capacity: document.capacity,
                });
            }
            if let Some(existing) = pairs.get(&(from.clone(), to.clone())) {
                return Err(GraphError::ParallelEdge {
                    edge: id,
                    existing: existing.clone(),
                    from: from.0,
                    to: to.0,
                });
            }
            pairs.insert((from.clone(), to.clone()), id.clone());

            edges.push(Edge {
                id,
                from,
                to,
                capacity: document.capacity,
            });
        }

        Ok(Self {
            name: definition.name,
            vertices,
            edges,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, id: &VertexId) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = &VertexId> {
        self.vertices.keys()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Resolve a vertex key or full id to a vertex of this graph
    pub fn resolve(&self, key_or_id: &str) -> Option<VertexId> {
        if let Some((id, _)) = self.vertices.get_key_value(&VertexId::new(key_or_id)) {
            return Some(id.clone());
        }
        self.vertices.keys().find(|id| id.key() == key_or_id).cloned()
    }

    /// Outgoing residual edges of every vertex.
    ///
    /// Each edge is paired with a reverse residual edge. Where the graph has
    /// no edge in the opposite direction, a synthetic one with capacity 0 and
    /// id `<edge-id>/reverse` is added.
    pub fn residual_edges(&self) -> BTreeMap<VertexId, Vec<ResidualEdge>> {
        let mut residual: BTreeMap<VertexId, Vec<ResidualEdge>> =
            self.vertices.keys().map(|id| (id.clone(), Vec::new())).collect();
        let pairs: BTreeSet<(&VertexId, &VertexId)> = self.edges.iter().map(|e| (&e.from, &e.to)).collect();

        for edge in &self.edges {
            residual.entry(edge.from.clone()).or_default().push(ResidualEdge {
                to: edge.to.clone(),
                id: edge.id.clone(),
                capacity: edge.capacity,
            });
            if !pairs.contains(&(&edge.to, &edge.from)) {
                residual.entry(edge.to.clone()).or_default().push(ResidualEdge {
                    to: edge.from.clone(),
                    id: format!("{}{}", edge.id, REVERSE_SUFFIX),
                    capacity: 0.0,
                });
            }
        }
        residual
    }

    /// Residual edge id to the vertex it points at
    pub fn residual_targets(&self) -> HashMap<String, VertexId> {
        self.residual_edges()
            .into_values()
            .flatten()
            .map(|edge| (edge.id, edge.to))
            .collect()
    }
}

struct StoredGraph {
    graph: Arc<Graph>,
    /// Result fields written by runs, per vertex
    results: BTreeMap<VertexId, serde_json::Map<String, serde_json::Value>>,
}

/// In-memory store of named graphs
#[derive(Default)]
pub struct GraphStore {
    graphs: RwLock<HashMap<String, StoredGraph>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a graph under its name
    pub async fn insert(&self, definition: GraphDefinition) -> Result<Arc<Graph>, GraphError> {
        let graph = Arc::new(Graph::from_definition(definition)?);
        let mut graphs = self.graphs.write().await;
        if graphs.contains_key(graph.name()) {
            return Err(GraphError::AlreadyExists(graph.name().to_string()));
        }
        tracing::info!(
            graph = graph.name(),
            vertices = graph.vertex_count(),
            edges = graph.edge_count(),
            "Graph loaded"
        );
        graphs.insert(
            graph.name().to_string(),
            StoredGraph {
                graph: Arc::clone(&graph),
                results: BTreeMap::new(),
            },
        );
        Ok(graph)
    }

    pub async fn get(&self, name: &str) -> Result<Arc<Graph>, GraphError> {
        self.graphs
            .read()
            .await
            .get(name)
            .map(|stored| Arc::clone(&stored.graph))
            .ok_or_else(|| GraphError::NotFound(name.to_string()))
    }

    pub async fn remove(&self, name: &str) -> Result<(), GraphError> {
        self.graphs
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| GraphError::NotFound(name.to_string()))
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.graphs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Write `field` on every listed vertex, returning how many were written
    pub async fn write_results(
        &self,
        name: &str,
        field: &str,
        values: HashMap<VertexId, serde_json::Value>,
    ) -> Result<usize, GraphError> {
        let mut graphs = self.graphs.write().await;
        let stored = graphs
            .get_mut(name)
            .ok_or_else(|| GraphError::NotFound(name.to_string()))?;

        let mut written = 0;
        for (id, value) in values {
            if stored.graph.contains(&id) {
                stored.results.entry(id).or_default().insert(field.to_string(), value);
                written += 1;
            } else {
                tracing::warn!(graph = name, vertex = %id, "Result for unknown vertex dropped");
            }
        }
        Ok(written)
    }

    /// Vertex documents with `_key`, `_id`, attributes and written results
    pub async fn vertex_documents(&self, name: &str) -> Result<Vec<serde_json::Value>, GraphError> {
        let graphs = self.graphs.read().await;
        let stored = graphs.get(name).ok_or_else(|| GraphError::NotFound(name.to_string()))?;

        let documents = stored
            .graph
            .vertices
            .iter()
            .map(|(id, document)| {
                let mut fields = serde_json::Map::new();
                fields.insert("_key".into(), document.key.clone().into());
                fields.insert("_id".into(), id.as_str().into());
                fields.extend(document.attributes.clone());
                if let Some(results) = stored.results.get(id) {
                    fields.extend(results.clone());
                }
                serde_json::Value::Object(fields)
            })
            .collect();
        Ok(documents)
    }
}
