//! Error taxonomy for the controller
//!
//! `ConfigError` is fatal at startup; `RegistrationError` is reported to the
//! caller with state unchanged. Output faults and state desyncs are handled
//! where they occur (logged, never propagated as a crash).

use thiserror::Error;

/// Fatal configuration errors; the controller refuses to start on any of these
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown rank '{0}' referenced")]
    UnknownRank(String),

    #[error("duplicate rank id '{0}'")]
    DuplicateRank(String),

    #[error("ranks '{first}' and '{second}' share output address {address}")]
    DuplicateAddress {
        first: String,
        second: String,
        address: String,
    },

    #[error("stop '{stop}' borrows from tremmed rank '{rank}'")]
    BorrowedFromTremmedRank { stop: String, rank: String },

    #[error("stop '{stop}' pitch offset {offset} exceeds ±{bound} semitones")]
    PitchOffsetOutOfBounds { stop: String, offset: i8, bound: i8 },

    #[error("coupler '{coupler}' octave shift {shift} is not one of -12, 0, +12")]
    BadOctaveShift { coupler: String, shift: i8 },

    #[error("duplicate stop id '{0}'")]
    DuplicateStop(String),

    #[error("duplicate coupler id '{0}'")]
    DuplicateCoupler(String),

    #[error("tremulant group '{group}' references unknown rank '{rank}'")]
    UnknownTremulantRank { group: String, rank: String },
}

/// Errors returned for registration commands naming unknown entities
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("unknown stop: {0}")]
    UnknownStop(String),

    #[error("unknown coupler: {0}")]
    UnknownCoupler(String),

    #[error("unknown tremulant group: {0}")]
    UnknownTremulant(String),

    #[error("division '{0}' has no swell box")]
    NotEnclosed(String),

    #[error("engine unavailable")]
    EngineUnavailable,
}
