//! Rank addressing & stop registration engine
//!
//! The serialized core of the controller:
//! - Note routing through drawn stops and engaged couplers, with
//!   extension, unification and borrowing applied per stop definition
//! - Activation-count tracking so each rank address/note sounds once no
//!   matter how many stop or coupler paths request it
//! - Registration state mutated only by explicit commands
//! - Swell expression and tremulant modulation for sounding ranks
//! - All-clear, panic and consistent status snapshots

mod actor;
mod commands;
mod handle;
mod registration;
mod router;
mod tracker;

#[cfg(test)]
mod tests;

pub use actor::EngineActor;
pub use commands::{KeyEvent, RegistrationAck, RegistrationCommand};
pub use handle::EngineHandle;
pub use registration::RegistrationState;
pub use router::{contributions_for_key, reached_divisions};
pub use tracker::{Contribution, EngineSnapshot, HeldKeyInfo, SoundingNoteInfo};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current timestamp in milliseconds since the epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
