use serde::{Deserialize, Serialize};

use super::{mode::Mode, stats::Stats};

/// Messages sent by the settings panel to the filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    ToggleExtension(bool),
    UpdateMode(Mode),
}

/// Messages the filter emits towards the storage boundary and any listening panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    IncrementStats,
    StatsUpdated(Stats),
}
