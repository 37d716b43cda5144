use courier_core::FileId;

use crate::dispatch::{EventSink, ListenerId};

/// Errors returned synchronously by transfer manager commands
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    #[error("Unknown file: {0}")]
    UnknownFile(FileId),
    #[error("Command rejected for {file_id}: {reason}")]
    Rejected { file_id: FileId, reason: String },
    #[error("Transfer manager unavailable")]
    Unavailable,
}

/// The subsystem that performs the actual file I/O.
///
/// Callbacks are delivered by posting [`courier_core::TransferEvent`]s to the
/// sink handed over in [`TransferManager::subscribe`], from any thread.
pub trait TransferManager: Send + Sync {
    fn subscribe(
        &self,
        file_id: FileId,
        listener: ListenerId,
        sink: EventSink,
    ) -> Result<(), ManagerError>;

    fn unsubscribe(&self, file_id: FileId, listener: ListenerId) -> Result<(), ManagerError>;

    fn start_transfer(&self, file_id: FileId) -> Result<(), ManagerError>;

    /// Fire-and-forget: the manager acknowledges with a state event
    fn cancel_transfer(&self, file_id: FileId) -> Result<(), ManagerError>;

    fn retry_transfer(&self, file_id: FileId) -> Result<(), ManagerError> {
        self.start_transfer(file_id)
    }
}

/// Optional notifier for voice and audio playback
pub trait TrackNotifier: Send + Sync {
    fn add_listener(&self, file_id: FileId, listener: ListenerId, sink: EventSink);

    fn remove_listener(&self, file_id: FileId, listener: ListenerId);
}
