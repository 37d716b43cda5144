use log::info;

pub mod blend;
pub mod entity;
pub mod error;
pub mod event;
pub mod state;

pub use blend::{blend, BlendInput, BlendPolicy, DEFAULT_GENERATION_BOUNDARY};
pub use entity::*;
pub use error::TransferError;
pub use event::{RemoteState, TransferEvent};
pub use state::{clamp_unit, ProgressSample, TransferState};

pub fn init() {
    info!("Courier core initialized");
}
