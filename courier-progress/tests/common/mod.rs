#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use courier_core::{FileId, FileSnapshot, RemoteState, TransferEvent};
use courier_progress::{
    ControllerConfig, EventSink, InvalidationObserver, ListenerId, Mailbox, ManagerError,
    ProgressView, TrackNotifier, TransferManager, TransferProgressController,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Subscribe(FileId),
    Unsubscribe(FileId),
    Start(FileId),
    Cancel(FileId),
    Retry(FileId),
    TrackAdd(FileId),
    TrackRemove(FileId),
}

/// Transfer manager double that records commands and lets tests emit
/// callbacks through whatever sink is currently registered.
#[derive(Default)]
pub struct RecordingManager {
    calls: Mutex<Vec<Call>>,
    sinks: Mutex<HashMap<FileId, EventSink>>,
    tracks: Mutex<HashMap<FileId, EventSink>>,
    pub refuse_subscribe: AtomicBool,
    pub refuse_start: AtomicBool,
}

impl RecordingManager {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    pub fn sink(&self, file_id: FileId) -> Option<EventSink> {
        self.sinks.lock().unwrap().get(&file_id).cloned()
    }

    pub fn track_sink(&self, file_id: FileId) -> Option<EventSink> {
        self.tracks.lock().unwrap().get(&file_id).cloned()
    }

    pub fn emit(&self, event: TransferEvent) {
        let sink = self
            .sink(event.file_id())
            .expect("no subscription for emitted event");
        sink.post(event).unwrap();
    }

    pub fn emit_progress(&self, file_id: FileId, raw: f32) {
        self.emit(TransferEvent::Progress {
            file_id,
            raw,
            bytes_done: (raw * 1000.0) as u64,
            bytes_total: 1000,
        });
    }

    pub fn emit_state(&self, file_id: FileId, state: RemoteState) {
        self.emit(TransferEvent::state_changed(file_id, state, FileSnapshot::default()));
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl TransferManager for RecordingManager {
    fn subscribe(
        &self,
        file_id: FileId,
        _listener: ListenerId,
        sink: EventSink,
    ) -> Result<(), ManagerError> {
        if self.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(ManagerError::Unavailable);
        }
        self.record(Call::Subscribe(file_id));
        self.sinks.lock().unwrap().insert(file_id, sink);
        Ok(())
    }

    fn unsubscribe(&self, file_id: FileId, listener: ListenerId) -> Result<(), ManagerError> {
        self.record(Call::Unsubscribe(file_id));
        let mut sinks = self.sinks.lock().unwrap();
        if sinks.get(&file_id).map(|s| s.listener()) == Some(listener) {
            sinks.remove(&file_id);
        }
        Ok(())
    }

    fn start_transfer(&self, file_id: FileId) -> Result<(), ManagerError> {
        self.record(Call::Start(file_id));
        if self.refuse_start.load(Ordering::SeqCst) {
            return Err(ManagerError::Rejected {
                file_id,
                reason: "storage full".to_string(),
            });
        }
        Ok(())
    }

    fn cancel_transfer(&self, file_id: FileId) -> Result<(), ManagerError> {
        self.record(Call::Cancel(file_id));
        Ok(())
    }

    fn retry_transfer(&self, file_id: FileId) -> Result<(), ManagerError> {
        self.record(Call::Retry(file_id));
        Ok(())
    }
}

impl TrackNotifier for RecordingManager {
    fn add_listener(&self, file_id: FileId, _listener: ListenerId, sink: EventSink) {
        self.record(Call::TrackAdd(file_id));
        self.tracks.lock().unwrap().insert(file_id, sink);
    }

    fn remove_listener(&self, file_id: FileId, _listener: ListenerId) {
        self.record(Call::TrackRemove(file_id));
        self.tracks.lock().unwrap().remove(&file_id);
    }
}

/// Observer double collecting every invalidation
#[derive(Default)]
pub struct RecordingObserver {
    views: Mutex<Vec<ProgressView>>,
}

impl RecordingObserver {
    pub fn views(&self) -> Vec<ProgressView> {
        self.views.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.views.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.views.lock().unwrap().clear();
    }

    pub fn visuals(&self) -> Vec<f32> {
        self.views().into_iter().map(|v| v.visual).collect()
    }
}

impl InvalidationObserver for RecordingObserver {
    fn on_invalidate(&self, view: &ProgressView) {
        self.views.lock().unwrap().push(*view);
    }
}

pub struct Harness {
    pub manager: Arc<RecordingManager>,
    pub observer: Arc<RecordingObserver>,
    pub controller: TransferProgressController,
    pub mailbox: Mailbox,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let manager = Arc::new(RecordingManager::default());
        let observer = Arc::new(RecordingObserver::default());
        let (controller, mailbox) = TransferProgressController::new(manager.clone(), config);
        let mut controller = controller.with_track_notifier(manager.clone());
        controller.set_observer(&observer);

        Self {
            manager,
            observer,
            controller,
            mailbox,
        }
    }

    /// Run the owning thread's loop once
    pub fn pump(&mut self) -> usize {
        self.mailbox.drain(&mut self.controller)
    }
}

pub fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}
