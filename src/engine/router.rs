//! Note routing
//!
//! Pure functions mapping one key event plus the current registration into
//! the set of (address, note) contributions it produces. The engine actor
//! applies the result against the tracker; nothing here mutates state.

use super::registration::RegistrationState;
use super::tracker::Contribution;
use crate::registry::{Division, RankRegistry};
use crate::stops::StopTable;
use tracing::trace;

/// Accumulated shifts beyond two full MIDI ranges can never produce a
/// playable target note; pruning there terminates shifted coupler cycles.
const MAX_ACCUMULATED_SHIFT: i16 = 255;

/// Divisions reached from the played division through engaged couplers,
/// with the accumulated octave shift for each path.
///
/// Shifts compose additively across chained engaged edges. Identical
/// (division, shift) pairs collapse, which also terminates coupler cycles;
/// the same division reached with two different shifts stays as two
/// independent entries.
pub fn reached_divisions(
    origin: Division,
    stops: &StopTable,
    registration: &RegistrationState,
) -> Vec<(Division, i16)> {
    let mut reached: Vec<(Division, i16)> = vec![(origin, 0)];
    let mut cursor = 0;

    while cursor < reached.len() {
        let (division, shift) = reached[cursor];
        cursor += 1;

        for coupler in stops.couplers_from(division) {
            if !registration.is_engaged(&coupler.id) {
                continue;
            }
            let next = (coupler.to_division, shift + coupler.octave_shift as i16);
            if next.1.abs() <= MAX_ACCUMULATED_SHIFT && !reached.contains(&next) {
                reached.push(next);
            }
        }
    }

    reached
}

/// Every contribution a key event produces under the current registration.
///
/// Out-of-range targets are a normal boundary condition of extension and
/// unification: that single contribution is dropped, never an error.
/// Contributions are NOT deduplicated here; the tracker's activation counts
/// decide which of them actually fire a note-on.
pub fn contributions_for_key(
    division: Division,
    note: u8,
    velocity: u8,
    registry: &RankRegistry,
    stops: &StopTable,
    registration: &RegistrationState,
) -> Vec<Contribution> {
    let mut contributions = Vec::new();

    for (reached, shift) in reached_divisions(division, stops, registration) {
        for stop in stops.stops_for(reached) {
            if !registration.is_drawn(&stop.id) {
                continue;
            }

            let target = note as i16 + stop.pitch_offset as i16 + shift;
            if !(0..=127).contains(&target) {
                trace!(
                    "Dropping contribution of {}: note {} outside MIDI range",
                    stop.id,
                    target
                );
                continue;
            }
            let target = target as u8;

            for source in &stop.sources {
                // Sources were validated at load; a miss here is unreachable
                // in practice but must not crash the engine
                let Ok(rank) = registry.resolve(&source.rank) else {
                    trace!("Dropping contribution of {}: rank {} unresolved", stop.id, source.rank);
                    continue;
                };

                if !rank.in_range(target) {
                    trace!(
                        "Dropping contribution of {}: note {} outside rank {} compass",
                        stop.id,
                        target,
                        rank.id
                    );
                    continue;
                }

                contributions.push(Contribution {
                    address: rank.address.clone(),
                    rank: rank.id.clone(),
                    note: target,
                    velocity: source.clamp_velocity(velocity),
                    stop: stop.id.clone(),
                    shift,
                });
            }
        }
    }

    contributions
}
