//! Tests for the engine: routing, unification, registration isolation,
//! panic and modulation behavior

use super::*;
use crate::config::{ModulationConfig, RankConfig, TremulantConfig};
use crate::output::{CaptureSink, OutputDispatcher};
use crate::registry::{Destination, Division, RankRegistry};
use crate::stops::{Coupler, Stop, StopKind, StopSource, StopTable};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn rank(
    id: &str,
    destination: Destination,
    port: &str,
    channel: u8,
    enclosed_in: Option<Division>,
) -> RankConfig {
    RankConfig {
        id: id.to_string(),
        name: None,
        destination,
        port: port.to_string(),
        channel,
        program: if destination == Destination::Virtual {
            Some(0)
        } else {
            None
        },
        first_note: 36,
        last_note: 96,
        enclosed_in,
    }
}

fn stop(id: &str, division: Division, offset: i8, kind: StopKind, rank: &str) -> Stop {
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

fn fixture_registry() -> Arc<RankRegistry> {
    let ranks = vec![
        rank("M1", Destination::Physical, "relay", 0, None),
        rank("M4", Destination::Physical, "relay", 3, Some(Division::Swell)),
        rank("D-Mix", Destination::Virtual, "synth", 0, None),
    ];
    let tremulants = fixture_tremulants();
    Arc::new(RankRegistry::from_config(&ranks, &tremulants).unwrap())
}

fn fixture_tremulants() -> Vec<TremulantConfig> {
    vec![TremulantConfig {
        id: "swell_trem".to_string(),
        rate_hz: 5.0,
        depth: 400,
        ranks: vec!["M4".to_string()],
    }]
}

fn fixture_stops(registry: &RankRegistry) -> Arc<StopTable> {
    let stops = vec![
        stop("GREAT_PRINCIPAL_8", Division::Great, 0, StopKind::Native, "M1"),
        stop("GREAT_FLUTE_8", Division::Great, 0, StopKind::Native, "M1"),
        stop("GREAT_OCTAVE_4", Division::Great, 12, StopKind::Extension, "M1"),
        stop("GREAT_MIXTURE", Division::Great, 0, StopKind::Digital, "D-Mix"),
        stop("SWELL_SALICIONAL_8", Division::Swell, 0, StopKind::Native, "M4"),
    ];
    let couplers = vec![Coupler {
        id: "SWELL_TO_GREAT".to_string(),
        from_division: Division::Great,
        to_division: Division::Swell,
        octave_shift: 0,
    }];
    Arc::new(StopTable::from_config(&stops, &couplers, registry, 24).unwrap())
}

struct Rig {
    engine: EngineHandle,
    capture: crate::output::midi_port::CaptureLog,
    registry: Arc<RankRegistry>,
}

impl Rig {
    async fn new() -> Self {
        let registry = fixture_registry();
        let stops = fixture_stops(&registry);
        let capture = CaptureSink::shared_log();

        let capture_for_factory = capture.clone();
        let dispatcher = OutputDispatcher::spawn(&registry, move |destination, port| {
            Ok(Box::new(CaptureSink::new(
                format!("{}:{}", destination, port),
                capture_for_factory.clone(),
            )))
        })
        .unwrap();

        let engine = EngineActor::spawn(
            registry.clone(),
            stops,
            fixture_tremulants(),
            &ModulationConfig::default(),
            dispatcher,
        );

        let rig = Self {
            engine,
            capture,
            registry,
        };
        // Swallow the virtual program preload
        rig.settle().await;
        rig.capture.lock().clear();
        rig
    }

    /// Wait until the engine has processed everything queued so far and the
    /// output workers have drained
    async fn settle(&self) {
        let _ = self.engine.snapshot().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn key(&self, division: Division, note: u8, down: bool) {
        self.engine.key_event(KeyEvent {
            division,
            note,
            down,
            velocity: 64,
            timestamp: 1,
        });
    }

    fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.capture.lock().clone()
    }

    fn clear_sent(&self) {
        self.capture.lock().clear();
    }
}

#[tokio::test]
async fn test_physical_and_digital_stop_sound_together() {
    // Worked example: Principal8 on M1 plus digital GreatMixture on D-Mix
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();
    rig.engine.toggle_stop("GREAT_MIXTURE").await.unwrap();

    rig.key(Division::Great, 60, true);
    rig.settle().await;

    let sent = rig.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.contains(&("physical:relay".to_string(), vec![0x90, 60, 64])));
    assert!(sent.contains(&("virtual:synth".to_string(), vec![0x90, 60, 64])));

    rig.clear_sent();
    rig.key(Division::Great, 60, false);
    rig.settle().await;

    let sent = rig.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.contains(&("physical:relay".to_string(), vec![0x80, 60, 0])));
    assert!(sent.contains(&("virtual:synth".to_string(), vec![0x80, 60, 0])));

    let snapshot = rig.engine.snapshot().await;
    assert!(snapshot.held_keys.is_empty());
    assert!(snapshot.sounding_notes.is_empty());
}

#[tokio::test]
async fn test_unification_two_stops_one_note_on() {
    // Two drawn stops sharing rank and pitch: one note-on, one note-off
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();
    rig.engine.toggle_stop("GREAT_FLUTE_8").await.unwrap();

    rig.key(Division::Great, 60, true);
    rig.settle().await;

    assert_eq!(rig.sent(), vec![("physical:relay".to_string(), vec![0x90, 60, 64])]);

    let snapshot = rig.engine.snapshot().await;
    assert_eq!(snapshot.sounding_notes.len(), 1);
    assert_eq!(snapshot.sounding_notes[0].activation_count, 2);

    rig.clear_sent();
    rig.key(Division::Great, 60, false);
    rig.settle().await;

    assert_eq!(rig.sent(), vec![("physical:relay".to_string(), vec![0x80, 60, 0])]);
}

#[tokio::test]
async fn test_unification_across_keys_last_contribution_silences() {
    // Key 48 through the 4' extension and key 60 through the 8' both land
    // on M1 note 60; the note-off comes only when the second key releases
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();
    rig.engine.toggle_stop("GREAT_OCTAVE_4").await.unwrap();

    rig.key(Division::Great, 60, true);
    rig.key(Division::Great, 48, true);
    rig.settle().await;

    let note_60_ons = rig
        .sent()
        .iter()
        .filter(|(_, d)| d == &vec![0x90, 60, 64])
        .count();
    assert_eq!(note_60_ons, 1);

    rig.clear_sent();
    rig.key(Division::Great, 60, false);
    rig.settle().await;

    // Key 48's extension contribution still holds note 60
    assert!(!rig.sent().iter().any(|(_, d)| d == &vec![0x80, 60, 0]));

    rig.key(Division::Great, 48, false);
    rig.settle().await;
    assert!(rig.sent().iter().any(|(_, d)| d == &vec![0x80, 60, 0]));

    let snapshot = rig.engine.snapshot().await;
    assert!(snapshot.sounding_notes.is_empty());
}

#[tokio::test]
async fn test_registration_change_does_not_touch_held_keys() {
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();

    rig.key(Division::Great, 60, true);
    rig.settle().await;
    rig.clear_sent();

    // Drawing a stop mid-hold emits nothing for the held key
    rig.engine.toggle_stop("GREAT_MIXTURE").await.unwrap();
    rig.settle().await;
    assert!(rig.sent().is_empty());

    // The release replays the key-down snapshot: relay only
    rig.key(Division::Great, 60, false);
    rig.settle().await;
    assert_eq!(rig.sent(), vec![("physical:relay".to_string(), vec![0x80, 60, 0])]);

    // The next key-down reflects the new registration
    rig.clear_sent();
    rig.key(Division::Great, 60, true);
    rig.settle().await;
    assert_eq!(rig.sent().len(), 2);
}

#[tokio::test]
async fn test_coupler_withdrawal_mid_hold_does_not_silence() {
    // Worked example: Swell to Great engaged, Salicional drawn on Swell
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();
    rig.engine.toggle_stop("SWELL_SALICIONAL_8").await.unwrap();
    rig.engine.toggle_coupler("SWELL_TO_GREAT").await.unwrap();

    rig.key(Division::Great, 60, true);
    rig.settle().await;

    let sent = rig.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.contains(&("physical:relay".to_string(), vec![0x90, 60, 64]))); // M1 ch0
    assert!(sent.contains(&("physical:relay".to_string(), vec![0x93, 60, 64]))); // M4 ch3

    // Withdrawing the coupler mid-hold does not silence the Swell voice
    rig.clear_sent();
    rig.engine.toggle_coupler("SWELL_TO_GREAT").await.unwrap();
    rig.settle().await;
    assert!(rig.sent().is_empty());

    rig.key(Division::Great, 60, false);
    rig.settle().await;
    let sent = rig.sent();
    assert!(sent.contains(&("physical:relay".to_string(), vec![0x80, 60, 0])));
    assert!(sent.contains(&("physical:relay".to_string(), vec![0x83, 60, 0])));
}

#[tokio::test]
async fn test_all_clear_withdraws_stops_but_keeps_sounding_notes() {
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();

    rig.key(Division::Great, 60, true);
    rig.settle().await;
    rig.clear_sent();

    match rig.engine.all_clear().await.unwrap() {
        RegistrationAck::AllClear { withdrawn } => assert_eq!(withdrawn, 1),
        other => panic!("unexpected ack: {:?}", other),
    }
    rig.settle().await;

    // No messages: all-clear only stops the act of drawing
    assert!(rig.sent().is_empty());
    let snapshot = rig.engine.snapshot().await;
    assert!(snapshot.drawn_stops.is_empty());
    assert_eq!(snapshot.sounding_notes.len(), 1);

    // The held key still releases cleanly from its snapshot
    rig.key(Division::Great, 60, false);
    rig.settle().await;
    assert_eq!(rig.sent(), vec![("physical:relay".to_string(), vec![0x80, 60, 0])]);
}

#[tokio::test]
async fn test_panic_sweeps_every_address_and_clears_state() {
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();
    rig.key(Division::Great, 60, true);
    rig.settle().await;
    rig.clear_sent();

    let swept = rig.engine.panic().await;
    assert_eq!(swept, rig.registry.all_addresses().len());
    rig.settle().await;

    // Three controller messages per address, silent addresses included
    let sent = rig.sent();
    assert_eq!(sent.len(), swept * 3);
    for channel in [0u8, 3] {
        for cc in [123u8, 120, 121] {
            assert!(sent.contains(&(
                "physical:relay".to_string(),
                vec![0xB0 | channel, cc, 0]
            )));
        }
    }
    assert!(sent.contains(&("virtual:synth".to_string(), vec![0xB0, 123, 0])));

    let snapshot = rig.engine.snapshot().await;
    assert!(snapshot.held_keys.is_empty());
    assert!(snapshot.sounding_notes.is_empty());
    // Registration survives a panic; only sounding state is reset
    assert_eq!(snapshot.drawn_stops, vec!["GREAT_PRINCIPAL_8".to_string()]);
}

#[tokio::test]
async fn test_retrigger_of_held_key_is_ignored() {
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();

    rig.key(Division::Great, 60, true);
    rig.key(Division::Great, 60, true);
    rig.settle().await;

    assert_eq!(rig.sent().len(), 1);
    let snapshot = rig.engine.snapshot().await;
    assert_eq!(snapshot.held_keys.len(), 1);
    assert_eq!(snapshot.sounding_notes[0].activation_count, 1);
}

#[tokio::test]
async fn test_key_up_without_key_down_is_ignored() {
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();

    rig.key(Division::Great, 60, false);
    rig.settle().await;

    assert!(rig.sent().is_empty());
    let snapshot = rig.engine.snapshot().await;
    assert!(snapshot.held_keys.is_empty());
    assert!(snapshot.sounding_notes.is_empty());
}

#[tokio::test]
async fn test_unknown_stop_and_coupler_rejected() {
    let rig = Rig::new().await;

    assert!(matches!(
        rig.engine.toggle_stop("GHOST_STOP").await,
        Err(crate::error::RegistrationError::UnknownStop(_))
    ));
    assert!(matches!(
        rig.engine.toggle_coupler("GHOST_COUPLER").await,
        Err(crate::error::RegistrationError::UnknownCoupler(_))
    ));

    let snapshot = rig.engine.snapshot().await;
    assert!(snapshot.drawn_stops.is_empty());
    assert!(snapshot.engaged_couplers.is_empty());
}

#[tokio::test]
async fn test_swell_cc_reaches_only_sounding_enclosed_ranks() {
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();
    rig.engine.toggle_stop("SWELL_SALICIONAL_8").await.unwrap();

    rig.key(Division::Great, 60, true);
    rig.key(Division::Swell, 62, true);
    rig.settle().await;
    rig.clear_sent();

    rig.engine.set_swell(Division::Swell, 42).await.unwrap();
    rig.settle().await;

    // Expression goes to M4's address (ch 3), not to M1's
    assert_eq!(rig.sent(), vec![("physical:relay".to_string(), vec![0xB3, 11, 42])]);

    // A division without a box is rejected
    assert!(matches!(
        rig.engine.set_swell(Division::Great, 42).await,
        Err(crate::error::RegistrationError::NotEnclosed(_))
    ));
}

#[tokio::test]
async fn test_swell_with_nothing_sounding_emits_nothing() {
    let rig = Rig::new().await;
    rig.engine.set_swell(Division::Swell, 10).await.unwrap();
    rig.settle().await;
    assert!(rig.sent().is_empty());

    let snapshot = rig.engine.snapshot().await;
    assert_eq!(snapshot.swell_position[&Division::Swell], 10);
}

#[tokio::test]
async fn test_tremulant_modulates_only_its_member_ranks() {
    let rig = Rig::new().await;
    rig.engine.toggle_stop("GREAT_PRINCIPAL_8").await.unwrap();
    rig.engine.toggle_stop("SWELL_SALICIONAL_8").await.unwrap();
    rig.engine.set_tremulant("swell_trem", true).await.unwrap();

    rig.key(Division::Great, 60, true);
    rig.key(Division::Swell, 62, true);
    rig.settle().await;
    rig.clear_sent();

    rig.engine.tremulant_tick();
    rig.settle().await;

    let sent = rig.sent();
    assert_eq!(sent.len(), 1);
    // Pitch bend on M4's channel only
    assert_eq!(sent[0].1[0], 0xE3);

    // Disengaging recenters the bend on member addresses
    rig.clear_sent();
    rig.engine.set_tremulant("swell_trem", false).await.unwrap();
    rig.settle().await;
    assert_eq!(rig.sent(), vec![("physical:relay".to_string(), vec![0xE3, 0x00, 0x40])]);

    // No further ticks modulate while disengaged
    rig.clear_sent();
    rig.engine.tremulant_tick();
    rig.settle().await;
    assert!(rig.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_tremulant_rejected() {
    let rig = Rig::new().await;
    assert!(matches!(
        rig.engine.set_tremulant("ghost", true).await,
        Err(crate::error::RegistrationError::UnknownTremulant(_))
    ));
}

proptest! {
    /// Leak-freedom: any key-down/key-up pairing under a fixed registration
    /// drains to zero sounding notes once every key is released
    #[test]
    fn prop_no_leaked_activations(keys in proptest::collection::hash_set((0u8..4, 36u8..97), 0..24)) {
        let registry = fixture_registry();
        let stops = fixture_stops(&registry);

        let mut registration = RegistrationState::new([], []);
        registration.toggle_stop("GREAT_PRINCIPAL_8");
        registration.toggle_stop("GREAT_OCTAVE_4");
        registration.toggle_stop("GREAT_MIXTURE");
        registration.toggle_stop("SWELL_SALICIONAL_8");
        registration.toggle_coupler("SWELL_TO_GREAT");

        let divisions = [Division::Great, Division::Swell, Division::Choir, Division::Pedal];
        let mut tracker = crate::engine::tracker::ActiveStateTracker::new();
        let mut held: Vec<crate::engine::tracker::KeyState> = Vec::new();

        for &(division_index, note) in &keys {
            let division = divisions[division_index as usize];
            let contributions = contributions_for_key(
                division, note, 64, &registry, &stops, &registration,
            );
            for contribution in &contributions {
                tracker.activate(contribution, 1);
            }
            held.push(crate::engine::tracker::KeyState {
                division,
                note,
                down_since: 1,
                contributions,
            });
        }

        for key in held {
            for contribution in &key.contributions {
                let release = tracker.deactivate(&contribution.address, contribution.note);
                prop_assert_ne!(release, crate::engine::tracker::Release::NotSounding);
            }
        }

        prop_assert_eq!(tracker.note_count(), 0);
    }
}
