//! Active state tracking
//!
//! Authoritative record of held keys and sounding rank-notes. Each sounding
//! (address, note) pair carries an activation count: the number of
//! (division, key, stop) contributions currently holding it. The underlying
//! MIDI note sounds iff the count is positive; a note-off is due only on the
//! 1 → 0 transition. This is what implements unification dedup.

use crate::registry::{Division, RankAddress};
use serde::Serialize;
use std::collections::HashMap;

/// One (address, note) request produced by routing a key event.
///
/// The stop id and accumulated coupler shift are carried for diagnostics;
/// identity for activation counting is (address, note).
#[derive(Debug, Clone)]
pub struct Contribution {
    pub address: RankAddress,
    pub rank: String,
    pub note: u8,
    pub velocity: u8,
    pub stop: String,
    pub shift: i16,
}

/// A currently-held key and the contribution snapshot taken at key-down.
///
/// Key-up replays exactly this snapshot, so registration changes while the
/// key is held never alter which notes the release silences.
#[derive(Debug, Clone)]
pub struct KeyState {
    pub division: Division,
    pub note: u8,
    pub down_since: u64,
    pub contributions: Vec<Contribution>,
}

/// One sounding note on one output address
#[derive(Debug, Clone)]
pub struct RankNoteState {
    pub rank: String,
    pub activation_count: u32,
    pub first_on: u64,
}

/// Outcome of retiring one contribution
#[derive(Debug, PartialEq, Eq)]
pub enum Release {
    /// Count reached zero; emit the note-off
    Silenced,
    /// Other contributions still hold the note
    StillHeld,
    /// No such sounding note was tracked (desync)
    NotSounding,
}

/// Held keys and sounding notes, owned by the engine actor
#[derive(Default)]
pub struct ActiveStateTracker {
    keys: HashMap<(Division, u8), KeyState>,
    notes: HashMap<(RankAddress, u8), RankNoteState>,
}

impl ActiveStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key is currently down
    pub fn key_is_down(&self, division: Division, note: u8) -> bool {
        self.keys.contains_key(&(division, note))
    }

    /// Record a key-down with its contribution snapshot
    pub fn insert_key(&mut self, key: KeyState) {
        self.keys.insert((key.division, key.note), key);
    }

    /// Remove and return a held key's state
    pub fn remove_key(&mut self, division: Division, note: u8) -> Option<KeyState> {
        self.keys.remove(&(division, note))
    }

    /// Count one contribution in; returns true on the 0 → 1 transition
    /// (the caller emits the note-on exactly then)
    pub fn activate(&mut self, contribution: &Contribution, now_ms: u64) -> bool {
        let entry = self
            .notes
            .entry((contribution.address.clone(), contribution.note));

        match entry {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                occupied.get_mut().activation_count += 1;
                false
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(RankNoteState {
                    rank: contribution.rank.clone(),
                    activation_count: 1,
                    first_on: now_ms,
                });
                true
            }
        }
    }

    /// Count one contribution out; `Release::Silenced` means emit the note-off
    pub fn deactivate(&mut self, address: &RankAddress, note: u8) -> Release {
        let key = (address.clone(), note);
        match self.notes.get_mut(&key) {
            None => Release::NotSounding,
            Some(state) => {
                state.activation_count -= 1;
                if state.activation_count == 0 {
                    self.notes.remove(&key);
                    Release::Silenced
                } else {
                    Release::StillHeld
                }
            }
        }
    }

    /// Addresses of sounding notes whose rank satisfies the predicate,
    /// deduplicated (for swell and tremulant scans)
    pub fn sounding_addresses_where<F>(&self, mut rank_matches: F) -> Vec<RankAddress>
    where
        F: FnMut(&str) -> bool,
    {
        let mut out: Vec<RankAddress> = Vec::new();
        for ((address, _note), state) in &self.notes {
            if state.activation_count > 0
                && rank_matches(&state.rank)
                && !out.contains(address)
            {
                out.push(address.clone());
            }
        }
        out
    }

    /// Number of held keys
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Number of sounding (address, note) pairs
    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    /// Drop all tracked state (panic recovery)
    pub fn clear(&mut self) {
        self.keys.clear();
        self.notes.clear();
    }

    /// Held keys for a snapshot, ordered by division and note
    pub fn held_keys(&self) -> Vec<HeldKeyInfo> {
        let mut keys: Vec<_> = self
            .keys
            .values()
            .map(|k| HeldKeyInfo {
                division: k.division,
                note: k.note,
                down_since: k.down_since,
            })
            .collect();
        keys.sort_by_key(|k| (k.division.as_str(), k.note));
        keys
    }

    /// Sounding notes for a snapshot, ordered by address and note
    pub fn sounding_notes(&self) -> Vec<SoundingNoteInfo> {
        let mut notes: Vec<_> = self
            .notes
            .iter()
            .map(|((address, note), state)| SoundingNoteInfo {
                rank: state.rank.clone(),
                address: address.to_string(),
                note: *note,
                activation_count: state.activation_count,
                first_on: state.first_on,
            })
            .collect();
        notes.sort_by(|a, b| (&a.address, a.note).cmp(&(&b.address, b.note)));
        notes
    }
}

/// A held key, as reported by status queries
#[derive(Debug, Clone, Serialize)]
pub struct HeldKeyInfo {
    pub division: Division,
    pub note: u8,
    pub down_since: u64,
}

/// A sounding note, as reported by status queries
#[derive(Debug, Clone, Serialize)]
pub struct SoundingNoteInfo {
    pub rank: String,
    pub address: String,
    pub note: u8,
    pub activation_count: u32,
    pub first_on: u64,
}

/// Consistent copy of the whole engine state for status/UI purposes
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub held_keys: Vec<HeldKeyInfo>,
    pub sounding_notes: Vec<SoundingNoteInfo>,
    pub drawn_stops: Vec<String>,
    pub engaged_couplers: Vec<String>,
    pub swell_position: HashMap<Division, u8>,
    pub tremulants: HashMap<String, bool>,
    pub degraded_outputs: Vec<String>,
}
