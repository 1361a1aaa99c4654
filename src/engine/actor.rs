//! Engine actor
//!
//! Owns the registration state and the active state tracker, and processes
//! every mutation sequentially from one channel: key events, registration
//! commands, snapshot reads and tremulant ticks all apply in arrival order
//! with no interleaving. Panic arrives on a dedicated lane the run loop
//! drains first.
//!
//! The actor performs no transport I/O itself; it emits finished
//! (address, message) pairs to the output dispatcher and moves on.

use super::commands::{EngineCommand, KeyEvent, PanicCommand, RegistrationAck, RegistrationCommand};
use super::handle::EngineHandle;
use super::registration::RegistrationState;
use super::router;
use super::tracker::{ActiveStateTracker, EngineSnapshot, KeyState, Release};
use crate::config::{ModulationConfig, TremulantConfig};
use crate::error::RegistrationError;
use crate::midi::{
    MidiMessage, CC_ALL_NOTES_OFF, CC_ALL_SOUND_OFF, CC_EXPRESSION, CC_RESET_CONTROLLERS,
    PITCH_BEND_CENTER,
};
use crate::output::DispatcherHandle;
use crate::registry::{Division, RankRegistry};
use crate::stops::StopTable;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One tremulant group's oscillator
struct TremulantOsc {
    config: TremulantConfig,
    phase: f32,
}

/// The serialized core of the controller
pub struct EngineActor {
    registry: Arc<RankRegistry>,
    stops: Arc<StopTable>,
    registration: RegistrationState,
    tracker: ActiveStateTracker,
    tremulants: Vec<TremulantOsc>,
    /// Oscillator time step per tick, in seconds
    trem_dt: f32,
    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    panic_rx: mpsc::UnboundedReceiver<PanicCommand>,
    output: DispatcherHandle,
}

impl EngineActor {
    /// Spawn the engine and return a handle for interacting with it
    pub fn spawn(
        registry: Arc<RankRegistry>,
        stops: Arc<StopTable>,
        tremulants: Vec<TremulantConfig>,
        modulation: &ModulationConfig,
        output: DispatcherHandle,
    ) -> EngineHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (panic_tx, panic_rx) = mpsc::unbounded_channel();

        let enclosed: HashSet<Division> = registry
            .ranks()
            .filter_map(|r| r.enclosed_in)
            .collect();
        let group_ids: Vec<String> = tremulants.iter().map(|t| t.id.clone()).collect();

        let actor = EngineActor {
            registry,
            stops,
            registration: RegistrationState::new(enclosed, group_ids),
            tracker: ActiveStateTracker::new(),
            tremulants: tremulants
                .into_iter()
                .map(|config| TremulantOsc { config, phase: 0.0 })
                .collect(),
            trem_dt: modulation.tremulant_tick_ms as f32 / 1000.0,
            command_rx: cmd_rx,
            panic_rx,
            output,
        };

        tokio::spawn(actor.run());
        info!("Engine actor spawned");

        EngineHandle::new(cmd_tx, panic_tx)
    }

    /// Main run loop: the panic lane always wins over ordinary commands
    async fn run(mut self) {
        debug!("Engine run loop started");

        loop {
            tokio::select! {
                biased;
                Some(panic) = self.panic_rx.recv() => {
                    let swept = self.handle_panic();
                    if let Some(response) = panic.response {
                        let _ = response.send(swept);
                    }
                }
                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd);
                }
                else => break,
            }
        }

        debug!("Engine run loop ended");
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Key(event) => {
                if event.down {
                    self.handle_key_down(event);
                } else {
                    self.handle_key_up(event);
                }
            }
            EngineCommand::Registration { command, response } => {
                let result = self.handle_registration(command);
                if let Err(ref e) = result {
                    debug!("Registration command rejected: {}", e);
                }
                if let Some(response) = response {
                    let _ = response.send(result);
                }
            }
            EngineCommand::Snapshot { response } => {
                let _ = response.send(self.build_snapshot());
            }
            EngineCommand::TremulantTick => {
                self.handle_tremulant_tick();
            }
        }
    }

    /// Key-down: route under the current registration, count contributions
    /// in, emit note-ons only on 0 → 1 transitions, and store the
    /// contribution snapshot on the key for replay at release.
    fn handle_key_down(&mut self, event: KeyEvent) {
        if self.tracker.key_is_down(event.division, event.note) {
            // Idempotent re-trigger guard: do not re-fire
            debug!(
                "Key {}:{} already down, re-trigger ignored",
                event.division, event.note
            );
            return;
        }

        let contributions = router::contributions_for_key(
            event.division,
            event.note,
            event.velocity,
            &self.registry,
            &self.stops,
            &self.registration,
        );

        debug!(
            "Key ON {}:{} vel {} -> {} contribution(s)",
            event.division,
            event.note,
            event.velocity,
            contributions.len()
        );

        for contribution in &contributions {
            if self.tracker.activate(contribution, event.timestamp) {
                self.output.send(
                    &contribution.address,
                    MidiMessage::NoteOn {
                        channel: contribution.address.channel,
                        note: contribution.note,
                        velocity: contribution.velocity,
                    },
                );
            }
        }

        self.tracker.insert_key(KeyState {
            division: event.division,
            note: event.note,
            down_since: event.timestamp,
            contributions,
        });
    }

    /// Key-up: replay the snapshot taken at key-down, count contributions
    /// out, emit note-offs on 1 → 0 transitions.
    fn handle_key_up(&mut self, event: KeyEvent) {
        let Some(key) = self.tracker.remove_key(event.division, event.note) else {
            // Desync: stay silent-but-alive, panic is the recovery path
            warn!(
                "State desync: key-up for {}:{} with no tracked key-down, ignored",
                event.division, event.note
            );
            return;
        };

        debug!(
            "Key OFF {}:{} -> retiring {} contribution(s)",
            event.division,
            event.note,
            key.contributions.len()
        );

        for contribution in &key.contributions {
            match self.tracker.deactivate(&contribution.address, contribution.note) {
                Release::Silenced => {
                    self.output.send(
                        &contribution.address,
                        MidiMessage::NoteOff {
                            channel: contribution.address.channel,
                            note: contribution.note,
                            velocity: 0,
                        },
                    );
                }
                Release::StillHeld => {}
                Release::NotSounding => {
                    warn!(
                        "State desync: contribution {}:{} of stop {} was not sounding",
                        contribution.address, contribution.note, contribution.stop
                    );
                }
            }
        }
    }

    /// Registration changes only affect subsequent key-downs; keys already
    /// held keep the contributions captured when they went down.
    fn handle_registration(
        &mut self,
        command: RegistrationCommand,
    ) -> Result<RegistrationAck, RegistrationError> {
        match command {
            RegistrationCommand::ToggleStop(id) => {
                let stop = self
                    .stops
                    .stop(&id)
                    .ok_or_else(|| RegistrationError::UnknownStop(id.clone()))?;
                let name = stop.display_name().to_string();
                let drawn = self.registration.toggle_stop(&id);
                info!("Stop {}: {}", if drawn { "drawn" } else { "withdrawn" }, id);
                Ok(RegistrationAck::Stop { id, name, drawn })
            }

            RegistrationCommand::ToggleCoupler(id) => {
                if self.stops.coupler(&id).is_none() {
                    return Err(RegistrationError::UnknownCoupler(id));
                }
                let engaged = self.registration.toggle_coupler(&id);
                info!(
                    "Coupler {}: {}",
                    if engaged { "engaged" } else { "disengaged" },
                    id
                );
                Ok(RegistrationAck::Coupler { id, engaged })
            }

            RegistrationCommand::SetSwell { division, position } => {
                if !self.registration.set_swell(division, position) {
                    return Err(RegistrationError::NotEnclosed(division.to_string()));
                }
                self.emit_swell(division, position.min(127));
                Ok(RegistrationAck::Swell {
                    division,
                    position: position.min(127),
                })
            }

            RegistrationCommand::SetTremulant { group, engaged } => {
                if !self.registration.set_tremulant(&group, engaged) {
                    return Err(RegistrationError::UnknownTremulant(group));
                }
                if !engaged {
                    self.reset_tremulant(&group);
                }
                info!(
                    "Tremulant {}: {}",
                    if engaged { "on" } else { "off" },
                    group
                );
                Ok(RegistrationAck::Tremulant { group, engaged })
            }

            RegistrationCommand::AllClear => {
                let withdrawn = self.registration.clear_stops();
                info!("All clear: {} stop(s) withdrawn", withdrawn);
                Ok(RegistrationAck::AllClear { withdrawn })
            }

            RegistrationCommand::Panic => {
                let addresses = self.handle_panic();
                Ok(RegistrationAck::Panic { addresses })
            }
        }
    }

    /// Swell position change: expression CC to every address currently
    /// sounding a rank enclosed in this division's box
    fn emit_swell(&mut self, division: Division, position: u8) {
        let registry = &self.registry;
        let addresses = self.tracker.sounding_addresses_where(|rank_id| {
            registry
                .resolve(rank_id)
                .map(|r| r.enclosed_in == Some(division))
                .unwrap_or(false)
        });

        debug!(
            "Swell {} -> {} on {} sounding address(es)",
            division,
            position,
            addresses.len()
        );

        for address in addresses {
            self.output.send(
                &address,
                MidiMessage::ControlChange {
                    channel: address.channel,
                    cc: CC_EXPRESSION,
                    value: position,
                },
            );
        }
    }

    /// One oscillator step for every engaged tremulant group
    fn handle_tremulant_tick(&mut self) {
        for osc in &mut self.tremulants {
            if !self.registration.tremulant_engaged(&osc.config.id) {
                continue;
            }

            osc.phase = crate::expression::advance_phase(osc.phase, osc.config.rate_hz, self.trem_dt);
            let bend = crate::expression::tremulant_bend(osc.phase, osc.config.depth);

            let members = &osc.config.ranks;
            let addresses = self
                .tracker
                .sounding_addresses_where(|rank_id| members.iter().any(|m| m == rank_id));

            for address in addresses {
                self.output.send(
                    &address,
                    MidiMessage::PitchBend {
                        channel: address.channel,
                        value: bend,
                    },
                );
            }
        }
    }

    /// Disengage: recenter the bend on every member address so no wavering
    /// offset sticks, and rewind the oscillator
    fn reset_tremulant(&mut self, group: &str) {
        let Some(osc) = self.tremulants.iter_mut().find(|o| o.config.id == group) else {
            return;
        };
        osc.phase = 0.0;

        for rank_id in &osc.config.ranks {
            if let Ok(rank) = self.registry.resolve(rank_id) {
                self.output.send(
                    &rank.address,
                    MidiMessage::PitchBend {
                        channel: rank.address.channel,
                        value: PITCH_BEND_CENTER,
                    },
                );
            }
        }
    }

    /// Emergency silence: sweep every known address regardless of tracked
    /// counts, then reset tracked state. The one operation allowed to
    /// desynchronize tracking from hardware, because it exists to recover
    /// from exactly that.
    fn handle_panic(&mut self) -> usize {
        let addresses = self.registry.all_addresses();
        info!("PANIC: sweeping {} output address(es)", addresses.len());

        for address in &addresses {
            for cc in [CC_ALL_NOTES_OFF, CC_ALL_SOUND_OFF, CC_RESET_CONTROLLERS] {
                self.output.send_urgent(
                    address,
                    MidiMessage::ControlChange {
                        channel: address.channel,
                        cc,
                        value: 0,
                    },
                );
            }
        }

        self.tracker.clear();
        for osc in &mut self.tremulants {
            osc.phase = 0.0;
        }

        addresses.len()
    }

    fn build_snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            held_keys: self.tracker.held_keys(),
            sounding_notes: self.tracker.sounding_notes(),
            drawn_stops: self.registration.drawn_stops(),
            engaged_couplers: self.registration.engaged_couplers(),
            swell_position: self.registration.swell_positions().clone(),
            tremulants: self.registration.tremulants().clone(),
            degraded_outputs: self.output.faults().list(),
        }
    }
}
