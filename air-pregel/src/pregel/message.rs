//! Message types for Pregel vertex communication
//!
//! Messages sent in superstep `k` are delivered at the start of `k + 1`
//! and consumed exactly once.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::vertex::VertexId;
use crate::accumulator::{FlowInput, Label};

/// Trait bound for vertex messages
///
/// Messages must serialize so pending queues can be checkpointed.
pub trait VertexMessage: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> VertexMessage for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Messages exchanged by the push-relabel phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FlowMessage {
    /// Flow pushed along the sender's residual edge
    Push(FlowInput),

    /// Ask a neighbour for its label
    LabelRequest { from: VertexId },

    /// Answer to a label request
    LabelResponse { from: VertexId, label: Label },

    /// Announce a new label after relabeling
    LabelUpdate { from: VertexId, label: Label },

    /// The sender's recorded flow toward the receiver, for reconciliation
    FlowReport { from: VertexId, flow: f64 },
}

impl FlowMessage {
    pub fn push(sender: &VertexId, additional_flow: f64) -> Self {
        Self::Push(FlowInput {
            sender: sender.as_str().to_string(),
            sender_name: sender.key().to_string(),
            additional_flow,
        })
    }

    /// Kind name, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Push(_) => "push",
            Self::LabelRequest { .. } => "label-request",
            Self::LabelResponse { .. } => "label-response",
            Self::LabelUpdate { .. } => "label-update",
            Self::FlowReport { .. } => "flow-report",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_wire_format() {
        let msg = FlowMessage::push(&VertexId::new("nodes/s"), 16.0);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "push", "sender": "nodes/s", "senderName": "s", "additionalFlow": 16.0})
        );
    }

    #[test]
    fn test_label_messages_wire_format() {
        let msg = FlowMessage::LabelResponse {
            from: VertexId::new("nodes/v1"),
            label: 3,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"type": "label-response", "from": "nodes/v1", "label": 3}));
        let back: FlowMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.kind(), "label-response");
    }
}
