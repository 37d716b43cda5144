use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use courier_core::{FileId, FileSnapshot, MessageId, RemoteState, TransferEvent};
use courier_progress::{EventSink, ListenerId, ManagerError, TrackNotifier, TransferManager};
use log::{debug, info, warn};

use crate::config::SimulationConfig;

/// Per-file bookkeeping shared with worker threads
#[derive(Debug)]
struct SimFile {
    size: u64,
    bytes_done: u64,
    subscriber: Option<(ListenerId, EventSink)>,
    track: Option<(ListenerId, EventSink)>,
    cancel: Option<Arc<AtomicBool>>,
}

impl SimFile {
    fn new(size: u64) -> Self {
        Self {
            size,
            bytes_done: 0,
            subscriber: None,
            track: None,
            cancel: None,
        }
    }

    fn snapshot(&self, file_id: FileId) -> FileSnapshot {
        let local_path = if self.bytes_done >= self.size {
            Some(std::env::temp_dir().join(format!("courier-{}.bin", file_id.0)))
        } else {
            None
        };
        FileSnapshot {
            size: self.size,
            bytes_done: self.bytes_done,
            local_path,
        }
    }
}

/// Transfer manager that moves imaginary bytes on its own worker threads
pub struct SimulatedManager {
    config: SimulationConfig,
    files: Arc<Mutex<HashMap<FileId, SimFile>>>,
}

impl SimulatedManager {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            files: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Per-thread generator; a configured seed makes each file's run repeatable
    fn rng(config: &SimulationConfig, file_id: FileId) -> fastrand::Rng {
        match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed ^ file_id.0 as u64),
            None => fastrand::Rng::new(),
        }
    }

    fn post(files: &Mutex<HashMap<FileId, SimFile>>, file_id: FileId, event: TransferEvent) {
        let sink = match files.lock() {
            Ok(files) => files
                .get(&file_id)
                .and_then(|f| f.subscriber.as_ref().map(|(_, sink)| sink.clone())),
            Err(_) => None,
        };
        match sink {
            Some(sink) => {
                if sink.post(event).is_err() {
                    debug!("Subscriber for {} is gone", file_id);
                }
            }
            None => debug!("No subscriber for {}, dropping event", file_id),
        }
    }

    /// Playable files become streamable as bytes arrive
    fn post_streaming(files: &Mutex<HashMap<FileId, SimFile>>, file_id: FileId, available: f32) {
        let sink = files.lock().ok().and_then(|f| {
            f.get(&file_id)
                .and_then(|f| f.track.as_ref().map(|(_, sink)| sink.clone()))
        });
        if let Some(sink) = sink {
            let _ = sink.post(TransferEvent::Streaming { file_id, available });
        }
    }

    fn run_worker(
        files: Arc<Mutex<HashMap<FileId, SimFile>>>,
        file_id: FileId,
        cancel: Arc<AtomicBool>,
        config: SimulationConfig,
    ) {
        let mut rng = Self::rng(&config, file_id);
        let snapshot = |files: &Mutex<HashMap<FileId, SimFile>>| {
            files
                .lock()
                .ok()
                .and_then(|f| f.get(&file_id).map(|f| f.snapshot(file_id)))
                .unwrap_or_default()
        };

        Self::post(
            &files,
            file_id,
            TransferEvent::state_changed(file_id, RemoteState::Active, snapshot(&files)),
        );

        let outcome = loop {
            thread::sleep(Duration::from_millis(config.chunk_delay_ms));

            if cancel.load(Ordering::SeqCst) {
                break RemoteState::Cancelled;
            }
            if config.failure_rate > 0.0 && rng.f64() < config.failure_rate {
                break RemoteState::Failed {
                    reason: "simulated network error".to_string(),
                };
            }

            let progress = {
                let Ok(mut files) = files.lock() else {
                    break RemoteState::Failed {
                        reason: "manager state poisoned".to_string(),
                    };
                };
                let Some(file) = files.get_mut(&file_id) else {
                    break RemoteState::Cancelled;
                };
                let jitter = rng.u64(0..=config.chunk_size / 4);
                file.bytes_done = (file.bytes_done + config.chunk_size + jitter).min(file.size);
                (file.bytes_done, file.size)
            };

            Self::post(&files, file_id, TransferEvent::progress(file_id, progress.0, progress.1));
            Self::post_streaming(&files, file_id, progress.0 as f32 / progress.1 as f32);
            if progress.0 >= progress.1 {
                break RemoteState::Completed;
            }
        };

        info!("Simulated transfer of {} finished: {:?}", file_id, outcome);
        if let Ok(mut files) = files.lock() {
            if let Some(file) = files.get_mut(&file_id) {
                file.cancel = None;
            }
        }
        Self::post(
            &files,
            file_id,
            TransferEvent::state_changed(file_id, outcome, snapshot(&files)),
        );
    }

    /// Transcode `file_id` locally, then hand it to the upload path
    pub fn spawn_generation(
        self: &Arc<Self>,
        file_id: FileId,
        sink: EventSink,
    ) -> thread::JoinHandle<()> {
        let manager = Arc::clone(self);
        let steps = self.config.generation_steps.max(1);
        let delay = Duration::from_millis(self.config.generation_delay_ms);

        thread::spawn(move || {
            for step in 1..=steps {
                thread::sleep(delay);
                let done = step == steps;
                let event = TransferEvent::Generation {
                    file_id,
                    progress: step as f32 / steps as f32,
                    done,
                };
                if sink.post(event).is_err() {
                    return;
                }
            }
            debug!("Generation of {} finished, starting upload", file_id);
            if let Err(e) = manager.start_transfer(file_id) {
                warn!("Upload of {} could not start: {}", file_id, e);
            }
        })
    }

    /// Resolve a locally queued message after a short delay
    pub fn spawn_promotion(
        &self,
        file_id: FileId,
        provisional: MessageId,
        sink: EventSink,
    ) -> thread::JoinHandle<()> {
        let delay = Duration::from_millis(self.config.chunk_delay_ms * 5);
        let mut rng = Self::rng(&self.config, file_id);
        let success = rng.f64() >= self.config.failure_rate;

        thread::spawn(move || {
            thread::sleep(delay);
            let resolved = if success {
                MessageId(rng.i64(1_000..1_000_000))
            } else {
                provisional
            };
            let _ = sink.post(TransferEvent::MessageResolved {
                file_id,
                provisional,
                resolved,
                success,
            });
        })
    }
}

impl TransferManager for SimulatedManager {
    fn subscribe(
        &self,
        file_id: FileId,
        listener: ListenerId,
        sink: EventSink,
    ) -> Result<(), ManagerError> {
        let mut files = self.files.lock().map_err(|_| ManagerError::Unavailable)?;
        let size = self.config.file_size.max(1);
        let file = files.entry(file_id).or_insert_with(|| SimFile::new(size));
        file.subscriber = Some((listener, sink));
        debug!("{} subscribed to {}", listener, file_id);
        Ok(())
    }

    fn unsubscribe(&self, file_id: FileId, listener: ListenerId) -> Result<(), ManagerError> {
        let mut files = self.files.lock().map_err(|_| ManagerError::Unavailable)?;
        let file = files.get_mut(&file_id).ok_or(ManagerError::UnknownFile(file_id))?;
        if file.subscriber.as_ref().map(|(l, _)| *l) == Some(listener) {
            file.subscriber = None;
        }
        Ok(())
    }

    fn start_transfer(&self, file_id: FileId) -> Result<(), ManagerError> {
        let cancel = {
            let mut files = self.files.lock().map_err(|_| ManagerError::Unavailable)?;
            let file = files.get_mut(&file_id).ok_or(ManagerError::UnknownFile(file_id))?;
            if file.cancel.is_some() {
                return Err(ManagerError::Rejected {
                    file_id,
                    reason: "already running".to_string(),
                });
            }
            let cancel = Arc::new(AtomicBool::new(false));
            file.cancel = Some(Arc::clone(&cancel));
            cancel
        };

        let files = Arc::clone(&self.files);
        let config = self.config.clone();
        thread::spawn(move || Self::run_worker(files, file_id, cancel, config));
        info!("Started simulated transfer of {}", file_id);
        Ok(())
    }

    fn cancel_transfer(&self, file_id: FileId) -> Result<(), ManagerError> {
        let files = self.files.lock().map_err(|_| ManagerError::Unavailable)?;
        let file = files.get(&file_id).ok_or(ManagerError::UnknownFile(file_id))?;
        match &file.cancel {
            Some(cancel) => {
                cancel.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(ManagerError::Rejected {
                file_id,
                reason: "not running".to_string(),
            }),
        }
    }
}

impl TrackNotifier for SimulatedManager {
    fn add_listener(&self, file_id: FileId, listener: ListenerId, sink: EventSink) {
        let Ok(mut files) = self.files.lock() else {
            return;
        };
        let size = self.config.file_size.max(1);
        files.entry(file_id).or_insert_with(|| SimFile::new(size)).track = Some((listener, sink));
    }

    fn remove_listener(&self, file_id: FileId, listener: ListenerId) {
        let Ok(mut files) = self.files.lock() else {
            return;
        };
        if let Some(file) = files.get_mut(&file_id) {
            if file.track.as_ref().map(|(l, _)| *l) == Some(listener) {
                file.track = None;
            }
        }
    }
}
