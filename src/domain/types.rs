use serde::Serialize;

use crate::dom::NodeId;

/// A discovered fragment waiting for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub element: NodeId,
    pub text: String,
}

/// Per-element concealment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcealmentState {
    #[default]
    Unseen,
    Visible,
    Concealed,
    Revealed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub pending: usize,
    pub in_flight: usize,
    pub draining: bool,
}
