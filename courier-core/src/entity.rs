use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable identifier of a file known to the transfer manager
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct FileId(pub i32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Identifier of the message that owns a file.
///
/// Negative values are provisional: the message is queued locally and has
/// not been acknowledged by the server yet.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl MessageId {
    pub fn is_provisional(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_provisional() {
            write!(f, "msg#{} (local)", self.0)
        } else {
            write!(f, "msg#{}", self.0)
        }
    }
}

/// Identifier of the conversation a message belongs to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Kind of content carried by a file
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Photo,
    Video,
    Animation,
    VoiceNote,
    Audio,
    Document,
}

impl ContentKind {
    /// Whether the content can be played through the track notifier
    pub fn is_playable(&self) -> bool {
        matches!(self, ContentKind::VoiceNote | ContentKind::Audio)
    }
}

/// Direction of a transfer
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Send,
    #[default]
    Receive,
}

/// The thing being transferred.
///
/// `file_id` never changes for one binding; `message_id` and `chat_id` may
/// be rebound in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntity {
    pub file_id: FileId,
    pub message_id: Option<MessageId>,
    pub chat_id: Option<ChatId>,
    pub kind: ContentKind,
}

impl TransferEntity {
    pub fn new(file_id: FileId, kind: ContentKind) -> Self {
        Self {
            file_id,
            message_id: None,
            chat_id: None,
            kind,
        }
    }

    pub fn with_message(mut self, chat_id: ChatId, message_id: MessageId) -> Self {
        self.chat_id = Some(chat_id);
        self.message_id = Some(message_id);
        self
    }

    /// Whether the owning message is still waiting for a server identifier
    pub fn is_local(&self) -> bool {
        self.message_id.map_or(false, |id| id.is_provisional())
    }
}

/// Metadata known about a file at bind time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferMetadata {
    /// Expected size in bytes, 0 when unknown
    pub size: u64,
    /// Bytes already present locally (downloaded or uploaded)
    pub bytes_done: u64,
    /// The file is fully available
    pub is_complete: bool,
    /// The transfer manager is moving bytes right now
    pub is_active: bool,
    pub direction: Direction,
    /// Local path of a completed file
    pub local_path: Option<PathBuf>,
}

impl TransferMetadata {
    /// Raw progress implied by the byte counters, if the size is known
    pub fn raw_progress(&self) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.size as f64).clamp(0.0, 1.0) as f32
    }

    /// Metadata that contradicts itself
    pub fn is_malformed(&self) -> bool {
        (self.is_complete && self.is_active) || (self.size > 0 && self.bytes_done > self.size)
    }
}

/// File state reported by the transfer manager together with a state change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub size: u64,
    pub bytes_done: u64,
    pub local_path: Option<PathBuf>,
}

impl FileSnapshot {
    pub fn raw_progress(&self) -> Option<f32> {
        if self.size == 0 {
            None
        } else {
            Some((self.bytes_done as f64 / self.size as f64).clamp(0.0, 1.0) as f32)
        }
    }
}
