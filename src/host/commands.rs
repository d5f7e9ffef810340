use serde::{Deserialize, Serialize};

use crate::{
    domain::{ControlMessage, Mode, QueueSnapshot},
    pipeline::engine::LedgerSummary,
};

/// One JSON line on the control channel. The first three variants are the
/// settings panel's messages; the rest drive the host page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostCommand {
    ToggleExtension(bool),
    UpdateMode(Mode),
    /// Written to storage only; the classifier follows the storage change.
    SetApiKey(Option<String>),
    AppendHtml {
        #[serde(default)]
        selector: Option<String>,
        html: String,
    },
    Remove {
        selector: String,
    },
    Click {
        selector: String,
    },
    Report,
}

impl HostCommand {
    pub fn control(&self) -> Option<ControlMessage> {
        match self {
            HostCommand::ToggleExtension(enabled) => Some(ControlMessage::ToggleExtension(*enabled)),
            HostCommand::UpdateMode(mode) => Some(ControlMessage::UpdateMode(*mode)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostEvent {
    Report(PipelineReport),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub profile: &'static str,
    pub enabled: bool,
    pub mode: Mode,
    pub processed: usize,
    pub queue: QueueSnapshot,
    pub concealment: LedgerSummary,
    pub concealed: Vec<ConcealedFragment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcealedFragment {
    pub element: String,
    pub container: Option<String>,
    pub text: String,
}
