use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::entity::TransferMetadata;

/// Lifecycle state of the bound file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferState {
    /// Nothing is moving; a tap starts the transfer
    #[default]
    Paused,
    /// Bytes are moving (or local generation is running)
    InProgress,
    /// The file is fully available
    Completed,
    /// The current episode ended with an error or cancellation
    Failed,
}

impl TransferState {
    /// Derive the starting state from bind-time metadata.
    ///
    /// Contradictory metadata degrades to `Paused`.
    pub fn from_metadata(metadata: &TransferMetadata) -> Self {
        if metadata.is_malformed() {
            debug!("Malformed transfer metadata, starting paused: {:?}", metadata);
            return TransferState::Paused;
        }
        if metadata.is_complete {
            TransferState::Completed
        } else if metadata.is_active {
            TransferState::InProgress
        } else {
            TransferState::Paused
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Paused => "paused",
            TransferState::InProgress => "in-progress",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Raw manager progress paired with the blended value the renderer animates toward
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSample {
    pub raw: f32,
    pub visual: f32,
}

impl ProgressSample {
    pub const ZERO: ProgressSample = ProgressSample { raw: 0.0, visual: 0.0 };
    pub const DONE: ProgressSample = ProgressSample { raw: 1.0, visual: 1.0 };

    pub fn new(raw: f32, visual: f32) -> Self {
        Self {
            raw: clamp_unit(raw),
            visual: clamp_unit(visual),
        }
    }

    /// Advance within one episode. Both components only move forward.
    ///
    /// Returns `true` when either component changed.
    pub fn advance(&mut self, raw: f32, visual: f32) -> bool {
        let raw = clamp_unit(raw);
        let visual = clamp_unit(visual);
        let mut changed = false;
        if raw > self.raw {
            self.raw = raw;
            changed = true;
        }
        if visual > self.visual {
            self.visual = visual;
            changed = true;
        }
        changed
    }
}

/// Clamp into `[0, 1]`, mapping NaN to 0
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
