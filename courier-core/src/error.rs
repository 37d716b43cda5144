use crate::entity::{FileId, MessageId};

/// Failures the controller records while tracking a transfer.
///
/// None of these cross the controller boundary; they surface as the
/// `Failed` state or as log output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("Transfer of {file_id} failed: {reason}")]
    TransferFailed { file_id: FileId, reason: String },
    #[error("Identifier promotion for {file_id} failed (provisional {provisional})")]
    RebindFailed {
        file_id: FileId,
        provisional: MessageId,
    },
    #[error("Subscription conflict: subscribed to {current} while subscribing to {requested}")]
    SubscriptionConflict { current: FileId, requested: FileId },
}

impl TransferError {
    pub fn file_id(&self) -> FileId {
        match self {
            TransferError::TransferFailed { file_id, .. }
            | TransferError::RebindFailed { file_id, .. } => *file_id,
            TransferError::SubscriptionConflict { requested, .. } => *requested,
        }
    }
}
