use crate::shared::time;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    SequenceStarted,
    SequenceStopped,
    SequenceStoppedWithError,
    StepStarted,
    StepStopped,
    StepStoppedWithError,
    /// Script output forwarded by the `print` command.
    StepOutput,
}

/// One status event emitted while a sequence runs. `step_index` is absent on
/// sequence-level events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub step_index: Option<usize>,
}

impl Message {
    pub fn for_sequence(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: time::now_epoch(),
            step_index: None,
        }
    }

    pub fn for_step(kind: MessageKind, text: impl Into<String>, step_index: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: time::now_epoch(),
            step_index: Some(step_index),
        }
    }
}
