use serde::{Deserialize, Serialize};

use crate::entity::{FileId, FileSnapshot, MessageId};

/// State reported by the transfer manager for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteState {
    /// Bytes are moving
    Active,
    /// The file is fully available
    Completed,
    /// The transfer was cancelled (by the user or the manager)
    Cancelled,
    /// The transfer stopped with an error
    Failed { reason: String },
    /// A completed file was removed from local storage and must be re-fetched
    Evicted,
}

/// Every callback the controller can receive, from any collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferEvent {
    /// Byte progress from the transfer manager
    Progress {
        file_id: FileId,
        raw: f32,
        bytes_done: u64,
        bytes_total: u64,
    },
    /// Lifecycle change from the transfer manager
    StateChanged {
        file_id: FileId,
        state: RemoteState,
        snapshot: FileSnapshot,
    },
    /// Local generation (transcoding) progress for an outgoing file
    Generation {
        file_id: FileId,
        progress: f32,
        done: bool,
    },
    /// Portion of the file available for streaming playback
    Streaming { file_id: FileId, available: f32 },
    /// Playback started or stopped in the track notifier
    Playback { file_id: FileId, playing: bool },
    /// A locally queued message received its permanent identifier
    MessageResolved {
        file_id: FileId,
        provisional: MessageId,
        resolved: MessageId,
        success: bool,
    },
}

impl TransferEvent {
    pub fn progress(file_id: FileId, bytes_done: u64, bytes_total: u64) -> Self {
        let raw = if bytes_total == 0 {
            0.0
        } else {
            (bytes_done as f64 / bytes_total as f64).clamp(0.0, 1.0) as f32
        };
        Self::Progress {
            file_id,
            raw,
            bytes_done,
            bytes_total,
        }
    }

    pub fn state_changed(file_id: FileId, state: RemoteState, snapshot: FileSnapshot) -> Self {
        Self::StateChanged {
            file_id,
            state,
            snapshot,
        }
    }

    pub fn file_id(&self) -> FileId {
        match self {
            TransferEvent::Progress { file_id, .. }
            | TransferEvent::StateChanged { file_id, .. }
            | TransferEvent::Generation { file_id, .. }
            | TransferEvent::Streaming { file_id, .. }
            | TransferEvent::Playback { file_id, .. }
            | TransferEvent::MessageResolved { file_id, .. } => *file_id,
        }
    }

    /// Lossy events are superseded by the next one of the same kind and may
    /// be dropped under backpressure.
    pub fn is_lossy(&self) -> bool {
        match self {
            TransferEvent::Progress { .. } | TransferEvent::Streaming { .. } => true,
            TransferEvent::Generation { done, .. } => !done,
            _ => false,
        }
    }
}
