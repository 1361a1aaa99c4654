//! organ-master - hybrid pipe organ master controller
//!
//! Routes key events from the console's manuals and pedalboard through the
//! live registration (stops, couplers, swell boxes, tremulants) to MIDI
//! output addresses: physical pipe-rank relay channels and a sample
//! engine's virtual voices.
//!
//! The core is the rank addressing & stop registration engine in
//! [`engine`]: a single-writer actor that applies extension, unification
//! and borrowing rules, deduplicates per (address, note) with activation
//! counts, and keeps authoritative sounding-note state so panic and status
//! reporting always agree with the hardware.

pub mod actions;
pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod expression;
pub mod input;
pub mod midi;
pub mod output;
pub mod registry;
pub mod stops;
