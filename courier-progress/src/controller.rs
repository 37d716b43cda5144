use std::path::Path;
use std::sync::{Arc, Weak};

use courier_core::{
    blend, clamp_unit, BlendInput, FileId, FileSnapshot, MessageId, ProgressSample, RemoteState,
    TransferEntity, TransferError, TransferEvent, TransferMetadata, TransferState,
};
use log::{debug, info, trace, warn};

use crate::config::ControllerConfig;
use crate::dispatch::{self, Envelope, EventHandler, EventSink, Mailbox};
use crate::manager::{ManagerError, TrackNotifier, TransferManager};
use crate::registry::{ListenerRegistry, SubscriptionHandle};

/// Receives redraw requests from the controller
pub trait InvalidationObserver: Send + Sync {
    fn on_invalidate(&self, view: &ProgressView);
}

/// Invoked when a completed file is activated
pub type OpenHandler = Box<dyn FnMut(&TransferEntity, Option<&Path>) + Send>;

/// Snapshot of everything the rendering layer draws
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressView {
    pub file_id: Option<FileId>,
    pub state: TransferState,
    pub visual: f32,
    pub raw: f32,
    /// Portion available for streaming playback
    pub streamed: f32,
    pub playing: bool,
    /// Failures seen for the current binding
    pub failure_count: u32,
}

/// Local generation bookkeeping for one binding
#[derive(Debug, Clone, Copy, Default)]
struct GenerationTracker {
    enabled: bool,
    done: bool,
    progress: f32,
}

impl GenerationTracker {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            done: false,
            progress: 0.0,
        }
    }

    fn finished() -> Self {
        Self {
            enabled: true,
            done: true,
            progress: 1.0,
        }
    }

    /// Returns `true` when the tracker moved
    fn update(&mut self, progress: f32, done: bool) -> bool {
        let progress = clamp_unit(progress);
        let mut changed = false;
        if progress > self.progress {
            self.progress = progress;
            changed = true;
        }
        if done && !self.done {
            self.done = true;
            self.progress = 1.0;
            changed = true;
        }
        changed
    }
}

/// Tracks one file's transfer and turns asynchronous manager callbacks into
/// ordered, idempotent state transitions.
///
/// All mutation happens on the thread that owns the controller and drains its
/// [`Mailbox`]; collaborators only ever see an [`EventSink`].
pub struct TransferProgressController {
    config: ControllerConfig,
    registry: ListenerRegistry,
    entity: Option<TransferEntity>,
    metadata: TransferMetadata,
    state: TransferState,
    sample: ProgressSample,
    // Raw progress remembered outside an episode; a new episode starts from it.
    last_raw: f32,
    generation: GenerationTracker,
    streamed: f32,
    playing: bool,
    failure_count: u32,
    last_error: Option<TransferError>,
    observer: Option<Weak<dyn InvalidationObserver>>,
    open_handler: Option<OpenHandler>,
    last_notified: Option<ProgressView>,
}

impl TransferProgressController {
    pub fn new(manager: Arc<dyn TransferManager>, config: ControllerConfig) -> (Self, Mailbox) {
        let config = config.validated();
        let (sink, mailbox) = dispatch::channel(config.queue_capacity);
        let controller = Self {
            config,
            registry: ListenerRegistry::new(manager, sink),
            entity: None,
            metadata: TransferMetadata::default(),
            state: TransferState::Paused,
            sample: ProgressSample::ZERO,
            last_raw: 0.0,
            generation: GenerationTracker::default(),
            streamed: 0.0,
            playing: false,
            failure_count: 0,
            last_error: None,
            observer: None,
            open_handler: None,
            last_notified: None,
        };
        (controller, mailbox)
    }

    pub fn with_track_notifier(mut self, tracks: Arc<dyn TrackNotifier>) -> Self {
        self.registry.set_track_notifier(tracks);
        self
    }

    pub fn set_observer<O: InvalidationObserver + 'static>(&mut self, observer: &Arc<O>) {
        let weak: Weak<O> = Arc::downgrade(observer);
        self.observer = Some(weak);
    }

    pub fn set_open_handler(&mut self, handler: OpenHandler) {
        self.open_handler = Some(handler);
    }

    pub fn current_state(&self) -> TransferState {
        self.state
    }

    pub fn current_visual_progress(&self) -> f32 {
        self.sample.visual
    }

    pub fn entity(&self) -> Option<&TransferEntity> {
        self.entity.as_ref()
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn last_error(&self) -> Option<&TransferError> {
        self.last_error.as_ref()
    }

    pub fn subscription(&self) -> &SubscriptionHandle {
        self.registry.handle()
    }

    /// Sink for producers tied to the bound file (e.g. the transcoder or the
    /// send queue). Events posted after the binding changes are discarded.
    pub fn event_sink(&self) -> Option<EventSink> {
        self.registry.current_sink().cloned()
    }

    pub fn view(&self) -> ProgressView {
        ProgressView {
            file_id: self.entity.as_ref().map(|e| e.file_id),
            state: self.state,
            visual: self.sample.visual,
            raw: self.sample.raw,
            streamed: self.streamed,
            playing: self.playing,
            failure_count: self.failure_count,
        }
    }

    /// Bind to a new entity, refresh the current one, or unbind with `None`.
    ///
    /// Never blocks and never fails; a manager that refuses the subscription
    /// leaves the controller bound but paused.
    pub fn bind(&mut self, entity: Option<TransferEntity>, metadata: TransferMetadata) {
        let entity = match entity {
            Some(entity) => entity,
            None => {
                self.unbind();
                return;
            }
        };

        if self.entity.as_ref().map(|e| e.file_id) == Some(entity.file_id) {
            self.refresh_in_place(entity, metadata);
            return;
        }

        self.registry.unsubscribe();
        self.reset_binding();

        let file_id = entity.file_id;
        let uses_generation = self
            .config
            .blend_policy
            .uses_generation(entity.kind, metadata.direction);
        self.generation = GenerationTracker::new(uses_generation);
        if uses_generation && metadata.bytes_done > 0 {
            // Bytes already moved, so local preparation is over.
            self.generation.update(1.0, true);
        }

        self.state = TransferState::from_metadata(&metadata);
        self.last_raw = if metadata.is_malformed() {
            0.0
        } else {
            metadata.raw_progress()
        };
        self.sample = match self.state {
            TransferState::Completed => ProgressSample::DONE,
            TransferState::InProgress => self.sample_from(self.last_raw),
            TransferState::Paused | TransferState::Failed => ProgressSample::ZERO,
        };

        let playable = entity.kind.is_playable();
        self.entity = Some(entity);
        self.metadata = metadata;

        if let Err(e) = self.registry.subscribe(file_id, playable) {
            warn!("Subscription for {} refused: {}; staying paused", file_id, e);
            self.state = TransferState::Paused;
            self.sample = ProgressSample::ZERO;
        }

        info!(
            "Bound {} | State: {} | Progress: {:.1}%",
            file_id,
            self.state,
            self.sample.visual * 100.0
        );
        self.notify(true);
    }

    fn unbind(&mut self) {
        if self.registry.unsubscribe() {
            debug!("Unbound from {:?}", self.entity.as_ref().map(|e| e.file_id));
        }
        self.entity = None;
        self.metadata = TransferMetadata::default();
        self.reset_binding();
        self.notify(false);
    }

    fn reset_binding(&mut self) {
        self.state = TransferState::Paused;
        self.sample = ProgressSample::ZERO;
        self.last_raw = 0.0;
        self.generation = GenerationTracker::default();
        self.streamed = 0.0;
        self.playing = false;
        self.failure_count = 0;
        self.last_error = None;
    }

    fn refresh_in_place(&mut self, entity: TransferEntity, metadata: TransferMetadata) {
        let Some(current) = self.entity.as_mut() else {
            return;
        };

        if current.message_id != entity.message_id {
            debug!(
                "Rebinding {} in place: {:?} -> {:?}",
                current.file_id, current.message_id, entity.message_id
            );
        }
        current.message_id = entity.message_id;
        current.chat_id = entity.chat_id;

        if metadata.size > 0 {
            self.metadata.size = metadata.size;
        }
        if metadata.local_path.is_some() {
            self.metadata.local_path = metadata.local_path;
        }
        // Direction is fixed for a binding; it decides generation blending.
        if metadata.direction != self.metadata.direction {
            debug!(
                "Ignoring direction change {:?} -> {:?} for {}",
                self.metadata.direction, metadata.direction, entity.file_id
            );
        }

        if self.registry.handle().transfer.is_none() {
            if let Err(e) = self.resubscribe() {
                warn!("Subscription for {} still refused: {}", entity.file_id, e);
            }
        }
    }

    /// Register again after the manager refused the subscription at bind
    fn resubscribe(&mut self) -> Result<(), ManagerError> {
        let Some(entity) = self.entity.as_ref() else {
            return Ok(());
        };
        let file_id = entity.file_id;
        self.registry.subscribe(file_id, entity.kind.is_playable())?;
        info!("Subscribed to {} after an earlier refusal", file_id);
        Ok(())
    }

    /// Promote a provisional message identifier to its permanent one.
    ///
    /// Success keeps state and progress untouched; failure moves to `Failed`
    /// whatever the prior state. The stored identifier is updated either way.
    pub fn rebind_message(&mut self, provisional: MessageId, resolved: MessageId, success: bool) {
        let Some(entity) = self.entity.as_mut() else {
            debug!("Message resolution for {} while unbound", provisional);
            return;
        };
        let file_id = entity.file_id;

        match entity.message_id {
            Some(current) if current == resolved && success => {
                trace!("Duplicate resolution {} -> {} for {}", provisional, resolved, file_id);
                return;
            }
            Some(current) if current != provisional && current != resolved => {
                debug!(
                    "Ignoring resolution {} -> {} for {}: bound to {}",
                    provisional, resolved, file_id, current
                );
                return;
            }
            _ => {}
        }

        entity.message_id = Some(resolved);
        debug!("Message for {} resolved {} -> {}", file_id, provisional, resolved);

        if !success && self.state != TransferState::Failed {
            self.fail(TransferError::RebindFailed { file_id, provisional });
        }
    }

    /// The single entry point for user interaction
    pub fn on_activate(&mut self) {
        let Some(file_id) = self.entity.as_ref().map(|e| e.file_id) else {
            debug!("Activation ignored: nothing bound");
            return;
        };

        let idle = matches!(self.state, TransferState::Paused | TransferState::Failed);
        if idle && self.registry.handle().transfer.is_none() {
            // Nobody would hear the manager's callbacks.
            if let Err(e) = self.resubscribe() {
                self.fail(TransferError::TransferFailed {
                    file_id,
                    reason: e.to_string(),
                });
                return;
            }
        }

        match self.state {
            TransferState::Paused => {
                debug!("Starting transfer of {}", file_id);
                if let Err(e) = self.registry.manager().start_transfer(file_id) {
                    self.fail(TransferError::TransferFailed {
                        file_id,
                        reason: e.to_string(),
                    });
                }
            }
            TransferState::InProgress => {
                debug!("Cancelling transfer of {}", file_id);
                if let Err(e) = self.registry.manager().cancel_transfer(file_id) {
                    warn!("Cancel of {} failed: {}", file_id, e);
                }
            }
            TransferState::Failed => {
                debug!("Retrying transfer of {}", file_id);
                if let Err(e) = self.registry.manager().retry_transfer(file_id) {
                    self.fail(TransferError::TransferFailed {
                        file_id,
                        reason: e.to_string(),
                    });
                }
            }
            TransferState::Completed => {
                let (Some(entity), Some(handler)) =
                    (self.entity.as_ref(), self.open_handler.as_mut())
                else {
                    debug!("No open handler for completed {}", file_id);
                    return;
                };
                handler(entity, self.metadata.local_path.as_deref());
            }
        }
    }

    fn sample_from(&self, raw: f32) -> ProgressSample {
        ProgressSample::new(raw, self.blended(raw))
    }

    fn blended(&self, raw: f32) -> f32 {
        blend(BlendInput {
            uses_generation: self.generation.enabled,
            generation_done: self.generation.done,
            generation_progress: self.generation.progress,
            raw_progress: raw,
            boundary: self.config.generation_boundary,
        })
    }

    fn apply(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::Progress { raw, .. } => self.on_progress(raw),
            TransferEvent::StateChanged { state, snapshot, .. } => {
                self.on_remote_state(state, snapshot)
            }
            TransferEvent::Generation { progress, done, .. } => self.on_generation(progress, done),
            TransferEvent::Streaming { available, .. } => self.on_streaming(available),
            TransferEvent::Playback { playing, .. } => {
                if self.playing != playing {
                    self.playing = playing;
                    self.notify(false);
                }
            }
            TransferEvent::MessageResolved {
                provisional,
                resolved,
                success,
                ..
            } => self.rebind_message(provisional, resolved, success),
        }
    }

    fn on_progress(&mut self, raw: f32) {
        let raw = clamp_unit(raw);
        match self.state {
            TransferState::InProgress => {
                if raw <= self.sample.raw {
                    return;
                }
                self.last_raw = raw;
                let visual = self.blended(raw);
                if self.sample.advance(raw, visual) {
                    self.notify(false);
                }
            }
            TransferState::Paused | TransferState::Failed => {
                self.last_raw = raw;
            }
            TransferState::Completed => {
                trace!("Progress {:.3} after completion ignored", raw);
            }
        }
    }

    fn on_remote_state(&mut self, remote: RemoteState, snapshot: FileSnapshot) {
        if snapshot.size > 0 {
            self.metadata.size = snapshot.size;
        }
        if snapshot.local_path.is_some() {
            self.metadata.local_path = snapshot.local_path.clone();
        }

        match (self.state, remote) {
            (TransferState::Paused | TransferState::Failed, RemoteState::Active) => {
                let raw = snapshot.raw_progress().unwrap_or(self.last_raw);
                self.begin_episode(raw);
            }
            (TransferState::InProgress, RemoteState::Active) => {
                if let Some(raw) = snapshot.raw_progress() {
                    self.on_progress(raw);
                }
            }
            (TransferState::Completed, RemoteState::Completed) => {}
            (_, RemoteState::Completed) => self.complete(),
            (TransferState::InProgress, RemoteState::Cancelled) => {
                self.fail_transfer("cancelled".to_string());
            }
            (TransferState::InProgress, RemoteState::Failed { reason }) => {
                self.fail_transfer(reason);
            }
            (TransferState::Completed, RemoteState::Evicted) => {
                info!("{:?} evicted, needs re-fetch", self.entity.as_ref().map(|e| e.file_id));
                self.state = TransferState::Paused;
                self.sample = ProgressSample::ZERO;
                self.last_raw = 0.0;
                self.notify(false);
            }
            (state, remote) => {
                debug!("Ignoring {:?} while {}", remote, state);
            }
        }
    }

    fn begin_episode(&mut self, raw: f32) {
        self.state = TransferState::InProgress;
        self.last_raw = clamp_unit(raw);
        self.sample = self.sample_from(self.last_raw);
        debug!(
            "Transfer of {:?} active from {:.1}%",
            self.entity.as_ref().map(|e| e.file_id),
            self.sample.raw * 100.0
        );
        self.notify(false);
    }

    fn complete(&mut self) {
        self.state = TransferState::Completed;
        self.sample = ProgressSample::DONE;
        self.last_raw = 1.0;
        if self.generation.enabled {
            self.generation = GenerationTracker::finished();
        }
        info!(
            "Transfer completed: {:?} | Size: {} bytes",
            self.entity.as_ref().map(|e| e.file_id),
            self.metadata.size
        );
        self.notify(false);
    }

    fn fail_transfer(&mut self, reason: String) {
        let Some(file_id) = self.entity.as_ref().map(|e| e.file_id) else {
            return;
        };
        self.fail(TransferError::TransferFailed { file_id, reason });
    }

    fn fail(&mut self, error: TransferError) {
        warn!(
            "{} | State: {} | Progress: {:.1}%",
            error,
            self.state,
            self.sample.visual * 100.0
        );
        self.state = TransferState::Failed;
        self.failure_count += 1;
        self.last_error = Some(error);
        self.notify(false);
    }

    fn on_generation(&mut self, progress: f32, done: bool) {
        if !self.generation.enabled || self.state == TransferState::Completed {
            trace!("Generation update ignored");
            return;
        }
        if !self.generation.update(progress, done) {
            return;
        }
        if self.state == TransferState::InProgress {
            let visual = self.blended(self.sample.raw);
            if self.sample.advance(self.sample.raw, visual) {
                self.notify(false);
            }
        }
    }

    fn on_streaming(&mut self, available: f32) {
        let available = clamp_unit(available);
        if available > self.streamed {
            self.streamed = available;
            self.notify(false);
        }
    }

    /// Tell the observer, unless nothing moved enough to be visible
    fn notify(&mut self, force: bool) {
        let view = self.view();
        let threshold = self.config.invalidate_threshold;

        let due = force
            || match self.last_notified {
                None => true,
                Some(prev) => {
                    prev.file_id != view.file_id
                        || prev.state != view.state
                        || prev.playing != view.playing
                        || prev.failure_count != view.failure_count
                        || moved(prev.visual, view.visual, threshold)
                        || moved(prev.streamed, view.streamed, threshold)
                }
            };
        if !due {
            return;
        }

        self.last_notified = Some(view);
        if let Some(observer) = self.observer.as_ref().and_then(|weak| weak.upgrade()) {
            observer.on_invalidate(&view);
        }
    }
}

fn moved(prev: f32, next: f32, threshold: f32) -> bool {
    if prev == next {
        return false;
    }
    (next - prev).abs() >= threshold || (next >= 1.0 && prev < 1.0)
}

impl EventHandler for TransferProgressController {
    fn handle(&mut self, envelope: Envelope) {
        if !self.registry.is_current(envelope.listener) {
            trace!(
                "Discarding {:?} from stale {}",
                envelope.event.file_id(),
                envelope.listener
            );
            return;
        }
        let bound = self.entity.as_ref().map(|e| e.file_id);
        if bound != Some(envelope.event.file_id()) {
            trace!(
                "Discarding event for {} while bound to {:?}",
                envelope.event.file_id(),
                bound
            );
            return;
        }
        self.apply(envelope.event);
    }
}
