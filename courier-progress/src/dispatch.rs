//! Marshals callbacks from transfer-manager worker threads onto the single
//! thread that owns the controller.
//!
//! Producers hold an [`EventSink`] and post immutable [`TransferEvent`]
//! values; the owner drains the matching [`Mailbox`] and applies them in
//! order. Events from one sink (and its clones) arrive in the order they
//! were posted; nothing is guaranteed across sinks.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use courier_core::TransferEvent;
use log::{debug, trace};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Registration key handed to collaborators alongside a sink
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ListenerId(pub u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// An event tagged with the registration it was delivered through
#[derive(Debug, Clone)]
pub struct Envelope {
    pub listener: ListenerId,
    pub event: TransferEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Mailbox closed")]
    Closed,
}

/// Consumer side of the boundary, implemented by the controller
pub trait EventHandler {
    fn handle(&mut self, envelope: Envelope);
}

/// Create a bounded dispatch channel
pub fn channel(capacity: usize) -> (EventSink, Mailbox) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let sink = EventSink {
        listener: ListenerId::next(),
        sender,
        overflow: Arc::default(),
    };
    (sink, Mailbox { receiver })
}

/// Events a sink deferred while the mailbox was full on a runtime thread.
///
/// While `active`, every later post from the same sink queues behind the
/// backlog so a single forwarder task delivers them in order.
#[derive(Default)]
struct Overflow {
    queue: VecDeque<Envelope>,
    active: bool,
}

fn lock(overflow: &Mutex<Overflow>) -> MutexGuard<'_, Overflow> {
    overflow.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn forward(sender: mpsc::Sender<Envelope>, overflow: Arc<Mutex<Overflow>>) {
    loop {
        let next = {
            let mut backlog = lock(&overflow);
            match backlog.queue.pop_front() {
                Some(envelope) => envelope,
                None => {
                    backlog.active = false;
                    return;
                }
            }
        };
        if sender.send(next).await.is_err() {
            debug!("Mailbox closed before deferred events were delivered");
            let mut backlog = lock(&overflow);
            backlog.queue.clear();
            backlog.active = false;
            return;
        }
    }
}

/// Cloneable producer handle, safe to move onto worker threads.
///
/// Clones share the registration key and its ordering.
#[derive(Clone)]
pub struct EventSink {
    listener: ListenerId,
    sender: mpsc::Sender<Envelope>,
    overflow: Arc<Mutex<Overflow>>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("listener", &self.listener)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl EventSink {
    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    /// A sink on the same mailbox under a fresh registration key
    pub fn rekey(&self) -> EventSink {
        EventSink {
            listener: ListenerId::next(),
            sender: self.sender.clone(),
            overflow: Arc::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Post an event without blocking the async runtime.
    ///
    /// Under backpressure lossy events (progress samples) are dropped. Other
    /// events block the calling worker thread until there is room, or are
    /// queued for an ordered forwarder when called from inside the runtime.
    pub fn post(&self, event: TransferEvent) -> Result<(), DispatchError> {
        let envelope = Envelope {
            listener: self.listener,
            event,
        };

        let mut backlog = lock(&self.overflow);
        if backlog.active {
            return self.defer(&mut backlog, envelope);
        }

        let envelope = match self.sender.try_send(envelope) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(DispatchError::Closed),
            Err(TrySendError::Full(envelope)) => envelope,
        };
        if envelope.event.is_lossy() {
            self.drop_superseded(&envelope);
            return Ok(());
        }

        match Handle::try_current() {
            Ok(handle) => {
                backlog.queue.push_back(envelope);
                backlog.active = true;
                handle.spawn(forward(self.sender.clone(), Arc::clone(&self.overflow)));
                Ok(())
            }
            Err(_) => {
                drop(backlog);
                self.sender
                    .blocking_send(envelope)
                    .map_err(|_| DispatchError::Closed)
            }
        }
    }

    /// Post from async code, waiting for capacity
    pub async fn post_async(&self, event: TransferEvent) -> Result<(), DispatchError> {
        let envelope = Envelope {
            listener: self.listener,
            event,
        };
        {
            let mut backlog = lock(&self.overflow);
            if backlog.active {
                return self.defer(&mut backlog, envelope);
            }
        }
        self.sender
            .send(envelope)
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Queue behind events the forwarder has not delivered yet
    fn defer(&self, backlog: &mut Overflow, envelope: Envelope) -> Result<(), DispatchError> {
        if self.sender.is_closed() {
            return Err(DispatchError::Closed);
        }
        if envelope.event.is_lossy() {
            self.drop_superseded(&envelope);
        } else {
            backlog.queue.push_back(envelope);
        }
        Ok(())
    }

    fn drop_superseded(&self, envelope: &Envelope) {
        trace!(
            "Mailbox full, dropping superseded event for {} via {}",
            envelope.event.file_id(),
            self.listener
        );
    }
}

/// Owner side of the boundary
pub struct Mailbox {
    receiver: mpsc::Receiver<Envelope>,
}

impl Mailbox {
    /// Apply every queued event without waiting. Returns how many were applied.
    ///
    /// This is the run-loop tick for owners that poll between frames.
    pub fn drain<H: EventHandler + ?Sized>(&mut self, handler: &mut H) -> usize {
        let mut applied = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => {
                    handler.handle(envelope);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Wait for the next event. `None` once every sink is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Wait for the next event on a plain thread.
    ///
    /// Panics if called from within an async runtime.
    pub fn next_blocking(&mut self) -> Option<Envelope> {
        self.receiver.blocking_recv()
    }

    /// Apply events as they arrive until every sink is dropped
    pub async fn run<H: EventHandler + ?Sized>(&mut self, handler: &mut H) {
        while let Some(envelope) = self.receiver.recv().await {
            handler.handle(envelope);
        }
    }
}
