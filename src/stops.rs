//! Stop & Coupler Definition Table
//!
//! Static description of every stop (division, pitch offset, source ranks,
//! kind) and the coupler adjacency list between divisions. Validated once at
//! load time against the Rank Address Registry; immutable afterwards.

use crate::error::ConfigError;
use crate::registry::{Division, RankRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a stop relates to its source rank(s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopKind {
    /// Speaks its own rank at unison pitch
    Native,
    /// Reuses a rank's pipes at another pitch
    Extension,
    /// Sourced from a rank assigned to another division
    Borrowed,
    /// Backed by a sample-engine voice
    Digital,
}

/// One rank reference inside a stop, with its velocity clamp.
///
/// Equal `velocity_min`/`velocity_max` give the fixed-velocity mode relay
/// hardware expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSource {
    pub rank: String,
    #[serde(default = "default_velocity_min")]
    pub velocity_min: u8,
    #[serde(default = "default_velocity_max")]
    pub velocity_max: u8,
}

impl StopSource {
    /// Clamp a note-on velocity to this source's configured range
    pub fn clamp_velocity(&self, velocity: u8) -> u8 {
        velocity.clamp(self.velocity_min, self.velocity_max)
    }
}

/// A playable unit a performer toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub division: Division,
    /// Signed semitone offset applied to the played key
    #[serde(default)]
    pub pitch_offset: i8,
    pub sources: Vec<StopSource>,
    #[serde(default = "default_stop_kind")]
    pub kind: StopKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unification_group: Option<String>,
}

impl Stop {
    /// Operator-facing name (falls back to the id)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Whether any source rank sits in a tremulant group
    pub fn tremmed(&self, registry: &RankRegistry) -> bool {
        self.sources
            .iter()
            .any(|s| registry.resolve(&s.rank).map(|r| r.tremmed).unwrap_or(false))
    }
}

/// Directed coupling edge between two divisions.
///
/// `from_division` is the division the performer plays; `to_division` is the
/// division whose drawn stops are pulled in. The conventional "Swell to
/// Great" coupler is therefore `from_division: great, to_division: swell`.
/// Chains traverse only through explicitly engaged edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupler {
    pub id: String,
    pub from_division: Division,
    pub to_division: Division,
    /// -12, 0 or +12 semitones
    #[serde(default)]
    pub octave_shift: i8,
}

/// Validated stop and coupler tables with per-division lookups
#[derive(Debug)]
pub struct StopTable {
    stops: HashMap<String, Stop>,
    /// Stop ids per division, in configuration order
    by_division: HashMap<Division, Vec<String>>,
    couplers: HashMap<String, Coupler>,
}

impl StopTable {
    /// Build and validate the table against the registry
    pub fn from_config(
        stops: &[Stop],
        couplers: &[Coupler],
        registry: &RankRegistry,
        max_pitch_offset: i8,
    ) -> Result<Self, ConfigError> {
        let mut table: HashMap<String, Stop> = HashMap::new();
        let mut by_division: HashMap<Division, Vec<String>> = HashMap::new();

        for stop in stops {
            if table.contains_key(&stop.id) {
                return Err(ConfigError::DuplicateStop(stop.id.clone()));
            }

            if stop.pitch_offset.abs() > max_pitch_offset {
                return Err(ConfigError::PitchOffsetOutOfBounds {
                    stop: stop.id.clone(),
                    offset: stop.pitch_offset,
                    bound: max_pitch_offset,
                });
            }

            for source in &stop.sources {
                let rank = registry.resolve(&source.rank)?;

                // A stop may never borrow out of a tremmed rank
                if stop.kind == StopKind::Borrowed && rank.tremmed {
                    return Err(ConfigError::BorrowedFromTremmedRank {
                        stop: stop.id.clone(),
                        rank: rank.id.clone(),
                    });
                }
            }

            by_division
                .entry(stop.division)
                .or_default()
                .push(stop.id.clone());
            table.insert(stop.id.clone(), stop.clone());
        }

        let mut coupler_table: HashMap<String, Coupler> = HashMap::new();
        for coupler in couplers {
            if coupler_table.contains_key(&coupler.id) {
                return Err(ConfigError::DuplicateCoupler(coupler.id.clone()));
            }
            if !matches!(coupler.octave_shift, -12 | 0 | 12) {
                return Err(ConfigError::BadOctaveShift {
                    coupler: coupler.id.clone(),
                    shift: coupler.octave_shift,
                });
            }
            coupler_table.insert(coupler.id.clone(), coupler.clone());
        }

        Ok(Self {
            stops: table,
            by_division,
            couplers: coupler_table,
        })
    }

    /// Look up a stop by id
    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id)
    }

    /// Look up a stop by id, case-insensitively (operator convenience)
    pub fn stop_ignore_case(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id).or_else(|| {
            self.stops
                .values()
                .find(|s| s.id.eq_ignore_ascii_case(stop_id))
        })
    }

    /// Stops belonging to a division, in configuration order
    pub fn stops_for(&self, division: Division) -> impl Iterator<Item = &Stop> {
        self.by_division
            .get(&division)
            .into_iter()
            .flatten()
            .filter_map(|id| self.stops.get(id))
    }

    /// All stops, in no particular order
    pub fn stops(&self) -> impl Iterator<Item = &Stop> {
        self.stops.values()
    }

    /// Look up a coupler by id
    pub fn coupler(&self, coupler_id: &str) -> Option<&Coupler> {
        self.couplers.get(coupler_id)
    }

    /// All couplers whose keys originate in the given division
    pub fn couplers_from(&self, division: Division) -> impl Iterator<Item = &Coupler> {
        self.couplers
            .values()
            .filter(move |c| c.from_division == division)
    }

    /// All couplers
    pub fn couplers(&self) -> impl Iterator<Item = &Coupler> {
        self.couplers.values()
    }
}

fn default_velocity_min() -> u8 {
    1
}

fn default_velocity_max() -> u8 {
    127
}

fn default_stop_kind() -> StopKind {
    StopKind::Native
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RankConfig, TremulantConfig};
    use crate::registry::Destination;

    fn test_registry() -> RankRegistry {
        let ranks = vec![
            RankConfig {
                id: "M1".to_string(),
                name: None,
                destination: Destination::Physical,
                port: "relay".to_string(),
                channel: 0,
                program: None,
                first_note: 36,
                last_note: 96,
                enclosed_in: None,
            },
            RankConfig {
                id: "M4".to_string(),
                name: None,
                destination: Destination::Physical,
                port: "relay".to_string(),
                channel: 3,
                program: None,
                first_note: 36,
                last_note: 96,
                enclosed_in: Some(Division::Swell),
            },
        ];
        let tremulants = vec![TremulantConfig {
            id: "swell_trem".to_string(),
            rate_hz: 5.0,
            depth: 64,
            ranks: vec!["M4".to_string()],
        }];
        RankRegistry::from_config(&ranks, &tremulants).unwrap()
    }

    fn stop(id: &str, division: Division, kind: StopKind, rank: &str, offset: i8) -> Stop {
        Stop {
            id: id.to_string(),
            name: None,
            division,
            pitch_offset: offset,
            sources: vec![StopSource {
                rank: rank.to_string(),
                velocity_min: 1,
                velocity_max: 127,
            }],
            kind,
            unification_group: None,
        }
    }

    #[test]
    fn test_borrow_from_tremmed_rank_rejected() {
        let registry = test_registry();
        let stops = vec![stop(
            "choir_borrowed",
            Division::Choir,
            StopKind::Borrowed,
            "M4",
            0,
        )];
        let err = StopTable::from_config(&stops, &[], &registry, 24).unwrap_err();
        assert!(matches!(err, ConfigError::BorrowedFromTremmedRank { .. }));
    }

    #[test]
    fn test_native_stop_on_tremmed_rank_allowed() {
        let registry = test_registry();
        let stops = vec![stop("swell_8", Division::Swell, StopKind::Native, "M4", 0)];
        let table = StopTable::from_config(&stops, &[], &registry, 24).unwrap();
        assert!(table.stop("swell_8").unwrap().tremmed(&registry));
    }

    #[test]
    fn test_unknown_source_rank_rejected() {
        let registry = test_registry();
        let stops = vec![stop("ghost", Division::Great, StopKind::Native, "M9", 0)];
        let err = StopTable::from_config(&stops, &[], &registry, 24).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRank(_)));
    }

    #[test]
    fn test_pitch_offset_bound_enforced() {
        let registry = test_registry();
        let stops = vec![stop(
            "too_far",
            Division::Great,
            StopKind::Extension,
            "M1",
            25,
        )];
        let err = StopTable::from_config(&stops, &[], &registry, 24).unwrap_err();
        assert!(matches!(err, ConfigError::PitchOffsetOutOfBounds { .. }));
    }

    #[test]
    fn test_bad_octave_shift_rejected() {
        let registry = test_registry();
        let couplers = vec![Coupler {
            id: "sw_gt".to_string(),
            from_division: Division::Great,
            to_division: Division::Swell,
            octave_shift: 7,
        }];
        let err = StopTable::from_config(&[], &couplers, &registry, 24).unwrap_err();
        assert!(matches!(err, ConfigError::BadOctaveShift { .. }));
    }

    #[test]
    fn test_stops_for_preserves_config_order() {
        let registry = test_registry();
        let stops = vec![
            stop("great_8", Division::Great, StopKind::Native, "M1", 0),
            stop("great_4", Division::Great, StopKind::Extension, "M1", 12),
            stop("swell_8", Division::Swell, StopKind::Native, "M4", 0),
        ];
        let table = StopTable::from_config(&stops, &[], &registry, 24).unwrap();
        let ids: Vec<_> = table.stops_for(Division::Great).map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["great_8", "great_4"]);
    }

    #[test]
    fn test_velocity_clamp() {
        let source = StopSource {
            rank: "M1".to_string(),
            velocity_min: 40,
            velocity_max: 100,
        };
        assert_eq!(source.clamp_velocity(10), 40);
        assert_eq!(source.clamp_velocity(64), 64);
        assert_eq!(source.clamp_velocity(127), 100);

        // Fixed-velocity mode
        let fixed = StopSource {
            rank: "M1".to_string(),
            velocity_min: 80,
            velocity_max: 80,
        };
        assert_eq!(fixed.clamp_velocity(1), 80);
        assert_eq!(fixed.clamp_velocity(127), 80);
    }
}
