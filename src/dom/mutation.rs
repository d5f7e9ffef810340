use tokio::sync::mpsc;

use ego_tree::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attributes {
        target: NodeId,
        name: String,
    },
    CharacterData {
        target: NodeId,
    },
}

impl MutationRecord {
    pub fn target(&self) -> NodeId {
        match self {
            MutationRecord::ChildList { target, .. }
            | MutationRecord::Attributes { target, .. }
            | MutationRecord::CharacterData { target } => *target,
        }
    }

    pub fn removed_nodes(&self) -> &[NodeId] {
        match self {
            MutationRecord::ChildList { removed, .. } => removed.as_slice(),
            _ => &[],
        }
    }

    pub fn has_added_nodes(&self) -> bool {
        matches!(self, MutationRecord::ChildList { added, .. } if !added.is_empty())
    }
}

/// Records delivered together in one notification cycle.
pub type MutationBatch = Vec<MutationRecord>;
pub type MutationReceiver = mpsc::UnboundedReceiver<MutationBatch>;
