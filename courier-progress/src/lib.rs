use log::info;

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod manager;
pub mod registry;

pub use config::ControllerConfig;
pub use controller::{InvalidationObserver, OpenHandler, ProgressView, TransferProgressController};
pub use dispatch::{channel, DispatchError, Envelope, EventHandler, EventSink, ListenerId, Mailbox};
pub use manager::{ManagerError, TrackNotifier, TransferManager};
pub use registry::{ListenerRegistry, Registration, SubscriptionHandle};

pub fn init() {
    info!("Courier progress controller initialized");
}
