//! Registration state: drawn stops, engaged couplers, swell positions,
//! tremulant switches
//!
//! Owned exclusively by the engine actor and mutated only by registration
//! commands; key routing reads it through the actor, never through a
//! free-floating global.

use crate::registry::Division;
use std::collections::{HashMap, HashSet};

/// Swell boxes start fully open
const SWELL_OPEN: u8 = 127;

/// The live registration
pub struct RegistrationState {
    drawn_stops: HashSet<String>,
    engaged_couplers: HashSet<String>,
    /// Position per enclosed division, 0 (shut) to 127 (open)
    swell_position: HashMap<Division, u8>,
    /// Engagement per tremulant group
    tremulant_engaged: HashMap<String, bool>,
}

impl RegistrationState {
    /// Start with nothing drawn; boxes open, tremulants off
    pub fn new(
        enclosed_divisions: impl IntoIterator<Item = Division>,
        tremulant_groups: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            drawn_stops: HashSet::new(),
            engaged_couplers: HashSet::new(),
            swell_position: enclosed_divisions
                .into_iter()
                .map(|d| (d, SWELL_OPEN))
                .collect(),
            tremulant_engaged: tremulant_groups.into_iter().map(|g| (g, false)).collect(),
        }
    }

    /// Toggle a stop; returns whether it is drawn afterwards
    pub fn toggle_stop(&mut self, stop_id: &str) -> bool {
        if self.drawn_stops.remove(stop_id) {
            false
        } else {
            self.drawn_stops.insert(stop_id.to_string());
            true
        }
    }

    pub fn is_drawn(&self, stop_id: &str) -> bool {
        self.drawn_stops.contains(stop_id)
    }

    /// Currently drawn stop ids, sorted for stable output
    pub fn drawn_stops(&self) -> Vec<String> {
        let mut stops: Vec<_> = self.drawn_stops.iter().cloned().collect();
        stops.sort();
        stops
    }

    /// Withdraw every drawn stop; returns how many were drawn
    pub fn clear_stops(&mut self) -> usize {
        let count = self.drawn_stops.len();
        self.drawn_stops.clear();
        count
    }

    /// Toggle a coupler; returns whether it is engaged afterwards
    pub fn toggle_coupler(&mut self, coupler_id: &str) -> bool {
        if self.engaged_couplers.remove(coupler_id) {
            false
        } else {
            self.engaged_couplers.insert(coupler_id.to_string());
            true
        }
    }

    pub fn is_engaged(&self, coupler_id: &str) -> bool {
        self.engaged_couplers.contains(coupler_id)
    }

    /// Currently engaged coupler ids, sorted for stable output
    pub fn engaged_couplers(&self) -> Vec<String> {
        let mut couplers: Vec<_> = self.engaged_couplers.iter().cloned().collect();
        couplers.sort();
        couplers
    }

    /// Whether a division has a swell box
    pub fn is_enclosed(&self, division: Division) -> bool {
        self.swell_position.contains_key(&division)
    }

    /// Set a box position; returns false for a division with no box
    pub fn set_swell(&mut self, division: Division, position: u8) -> bool {
        match self.swell_position.get_mut(&division) {
            Some(slot) => {
                *slot = position.min(127);
                true
            }
            None => false,
        }
    }

    pub fn swell_position(&self, division: Division) -> Option<u8> {
        self.swell_position.get(&division).copied()
    }

    pub fn swell_positions(&self) -> &HashMap<Division, u8> {
        &self.swell_position
    }

    /// Flip a tremulant group; returns false for an unknown group
    pub fn set_tremulant(&mut self, group: &str, engaged: bool) -> bool {
        match self.tremulant_engaged.get_mut(group) {
            Some(slot) => {
                *slot = engaged;
                true
            }
            None => false,
        }
    }

    pub fn tremulant_engaged(&self, group: &str) -> bool {
        self.tremulant_engaged.get(group).copied().unwrap_or(false)
    }

    pub fn tremulants(&self) -> &HashMap<String, bool> {
        &self.tremulant_engaged
    }
}
