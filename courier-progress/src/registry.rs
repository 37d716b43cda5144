use std::sync::Arc;

use courier_core::{FileId, TransferError};
use log::{debug, error, warn};

use crate::dispatch::{EventSink, ListenerId};
use crate::manager::{ManagerError, TrackNotifier, TransferManager};

/// One live registration with a collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub file_id: FileId,
    pub listener: ListenerId,
}

/// What the controller is currently registered for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub transfer: Option<Registration>,
    pub track: Option<Registration>,
}

impl SubscriptionHandle {
    pub fn is_empty(&self) -> bool {
        self.transfer.is_none() && self.track.is_none()
    }
}

/// Keeps subscribe/unsubscribe symmetric across entity swaps.
///
/// Every subscription gets a fresh listener key, so events still in flight
/// from an earlier registration can be told apart. Dropping the registry
/// releases whatever is still registered.
pub struct ListenerRegistry {
    manager: Arc<dyn TransferManager>,
    tracks: Option<Arc<dyn TrackNotifier>>,
    root: EventSink,
    current: Option<EventSink>,
    handle: SubscriptionHandle,
    conflicts: u64,
}

impl ListenerRegistry {
    pub fn new(manager: Arc<dyn TransferManager>, root: EventSink) -> Self {
        Self {
            manager,
            tracks: None,
            root,
            current: None,
            handle: SubscriptionHandle::default(),
            conflicts: 0,
        }
    }

    pub fn set_track_notifier(&mut self, tracks: Arc<dyn TrackNotifier>) {
        self.tracks = Some(tracks);
    }

    pub fn manager(&self) -> &Arc<dyn TransferManager> {
        &self.manager
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Number of self-healed subscription conflicts
    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }

    /// Sink of the live registration, for producers tied to the bound file
    pub fn current_sink(&self) -> Option<&EventSink> {
        self.current.as_ref()
    }

    /// Whether `listener` belongs to the live registration
    pub fn is_current(&self, listener: ListenerId) -> bool {
        self.current
            .as_ref()
            .map_or(false, |sink| sink.listener() == listener)
    }

    /// Register for `file_id` with the transfer manager, and with the track
    /// notifier when `playable`.
    ///
    /// Subscribing while registered for another file is a caller bug; it is
    /// logged and healed by unsubscribing first.
    pub fn subscribe(&mut self, file_id: FileId, playable: bool) -> Result<(), ManagerError> {
        if let Some(registration) = self.handle.transfer {
            if registration.file_id == file_id {
                debug!("Already subscribed to {} as {}", file_id, registration.listener);
                return Ok(());
            }
            let conflict = TransferError::SubscriptionConflict {
                current: registration.file_id,
                requested: file_id,
            };
            error!("{}; forcing unsubscribe", conflict);
            self.conflicts += 1;
            self.unsubscribe();
        }

        let sink = self.root.rekey();
        let listener = sink.listener();
        self.manager.subscribe(file_id, listener, sink.clone())?;
        self.handle.transfer = Some(Registration { file_id, listener });
        debug!("Subscribed to {} as {}", file_id, listener);

        if playable {
            if let Some(tracks) = &self.tracks {
                tracks.add_listener(file_id, listener, sink.clone());
                self.handle.track = Some(Registration { file_id, listener });
                debug!("Registered track listener for {}", file_id);
            }
        }

        self.current = Some(sink);
        Ok(())
    }

    /// Release every registration. Returns `false` when nothing was registered.
    pub fn unsubscribe(&mut self) -> bool {
        let had_any = !self.handle.is_empty();

        if let Some(registration) = self.handle.track.take() {
            if let Some(tracks) = &self.tracks {
                tracks.remove_listener(registration.file_id, registration.listener);
            }
        }

        if let Some(registration) = self.handle.transfer.take() {
            if let Err(e) = self
                .manager
                .unsubscribe(registration.file_id, registration.listener)
            {
                warn!("Unsubscribe from {} failed: {}", registration.file_id, e);
            } else {
                debug!("Unsubscribed from {}", registration.file_id);
            }
        }

        self.current = None;
        had_any
    }
}

impl Drop for ListenerRegistry {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
