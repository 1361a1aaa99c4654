//! Command types for the engine actor
//!
//! Key events and registration commands share one serialized channel so every
//! read-modify-write applies atomically in arrival order. Panic travels on
//! its own lane with priority over queued ordinary events.

use super::tracker::EngineSnapshot;
use crate::error::RegistrationError;
use crate::registry::Division;
use tokio::sync::oneshot;

/// Normalized key event from a manual or the pedalboard
#[derive(Debug, Clone)]
pub struct KeyEvent {
    pub division: Division,
    /// MIDI note number (0-127)
    pub note: u8,
    /// true = key-down, false = key-up
    pub down: bool,
    /// Velocity as played (0-127); clamped per stop source during routing
    pub velocity: u8,
    /// Milliseconds since the epoch, stamped by the input transport
    pub timestamp: u64,
}

/// A registration change from the control surface
#[derive(Debug, Clone)]
pub enum RegistrationCommand {
    ToggleStop(String),
    ToggleCoupler(String),
    SetSwell { division: Division, position: u8 },
    SetTremulant { group: String, engaged: bool },
    AllClear,
    Panic,
}

/// What a registration command did, reported back to the caller
#[derive(Debug, Clone)]
pub enum RegistrationAck {
    Stop { id: String, name: String, drawn: bool },
    Coupler { id: String, engaged: bool },
    Swell { division: Division, position: u8 },
    Tremulant { group: String, engaged: bool },
    AllClear { withdrawn: usize },
    Panic { addresses: usize },
}

/// Commands for the engine actor
///
/// Key events are fire-and-forget: the console transport must never block on
/// the engine. Registration commands carry an optional responder so the REST
/// surface and the REPL can report what happened; stop-tab input sends them
/// without one.
pub enum EngineCommand {
    /// A key went down or up on some division
    Key(KeyEvent),

    /// Registration change, optionally acknowledged
    Registration {
        command: RegistrationCommand,
        response: Option<oneshot::Sender<Result<RegistrationAck, RegistrationError>>>,
    },

    /// Consistent read of the whole engine state
    Snapshot {
        response: oneshot::Sender<EngineSnapshot>,
    },

    /// Tremulant oscillator tick (sent by the modulation clock)
    TremulantTick,
}

/// The panic lane carries exactly one command shape
pub struct PanicCommand {
    /// Addresses swept, reported when a caller is waiting
    pub response: Option<oneshot::Sender<usize>>,
}
