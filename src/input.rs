//! Console input
//!
//! Decodes raw MIDI from the console transport into normalized key events
//! and registration commands, using the configured channel map: one channel
//! per keyboard (manuals and pedalboard), an optional stop-tab channel with
//! note-to-stop mappings. Notes outside a keyboard's compass are pistons
//! and are ignored here.

use crate::config::InputConfig;
use crate::engine::{now_ms, EngineHandle, KeyEvent, RegistrationCommand};
use crate::midi::{find_port_by_substring, MidiMessage};
use crate::registry::Division;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// What one console MIDI message means
#[derive(Debug, Clone)]
pub enum InputAction {
    Key(KeyEvent),
    Registration(RegistrationCommand),
}

/// Channel-map lookups built once from configuration
pub struct InputMapper {
    /// channel -> (division, first playable note, last playable note)
    keyboards: HashMap<u8, (Division, u8, u8)>,
    /// stop-tab channel and its note -> stop id table
    stop_tabs: Option<(u8, HashMap<u8, String>)>,
}

impl InputMapper {
    pub fn new(config: &InputConfig) -> Self {
        let keyboards = config
            .keyboards
            .iter()
            .map(|(division, kb)| (kb.channel, (*division, kb.first_note, kb.last_note)))
            .collect();

        let stop_tabs = config
            .stop_tabs
            .as_ref()
            .map(|tabs| (tabs.channel, tabs.mappings.clone()));

        Self {
            keyboards,
            stop_tabs,
        }
    }

    /// Map one decoded message to an action, or None for traffic the
    /// engine does not route
    pub fn map(&self, message: &MidiMessage, timestamp: u64) -> Option<InputAction> {
        let (channel, note, velocity, down) = match *message {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => (channel, note, velocity, true),
            MidiMessage::NoteOff { channel, note, .. } => (channel, note, 0, false),
            _ => {
                debug!("Ignoring non-note console message: {}", message);
                return None;
            }
        };

        if let Some(&(division, first, last)) = self.keyboards.get(&channel) {
            if note < first || note > last {
                debug!("Ignoring piston on {}: note {}", division, note);
                return None;
            }
            return Some(InputAction::Key(KeyEvent {
                division,
                note,
                down,
                velocity,
                timestamp,
            }));
        }

        if let Some((tab_channel, mappings)) = &self.stop_tabs {
            if channel == *tab_channel {
                // Latching tabs toggle on press; the release is no-op
                if !down {
                    return None;
                }
                return match mappings.get(&note) {
                    Some(stop_id) => Some(InputAction::Registration(
                        RegistrationCommand::ToggleStop(stop_id.clone()),
                    )),
                    None => {
                        debug!("Unmapped stop tab: note {}", note);
                        None
                    }
                };
            }
        }

        debug!("Unknown console channel: {}", channel);
        None
    }
}

/// Open console input; the connection feeds the engine until dropped
pub struct ConsoleInput {
    _connection: midir::MidiInputConnection<()>,
}

impl ConsoleInput {
    /// Open the configured input port and wire decoded events into the
    /// engine. The midir callback runs on the transport thread; both engine
    /// channels are lock-free sends, so it never blocks there.
    pub fn start(config: &InputConfig, engine: EngineHandle) -> Result<Self> {
        let mapper = InputMapper::new(config);

        let midi_in = midir::MidiInput::new("organ-master")?;
        let port = find_port_by_substring(&midi_in, &config.port)
            .ok_or_else(|| anyhow!("Console input port '{}' not found", config.port))?;

        let port_name = midi_in.port_name(&port).unwrap_or_else(|_| config.port.clone());

        let connection = midi_in
            .connect(
                &port,
                "organ-master-console",
                move |_timestamp, data, _| {
                    let Some(message) = MidiMessage::parse(data) else {
                        return;
                    };
                    match mapper.map(&message, now_ms()) {
                        Some(InputAction::Key(event)) => engine.key_event(event),
                        Some(InputAction::Registration(command)) => engine.registration(command),
                        None => {}
                    }
                },
                (),
            )
            .map_err(|e| anyhow!("Failed to connect console input: {}", e))?;

        info!("Console input opened: '{}'", port_name);
        Ok(Self {
            _connection: connection,
        })
    }
}
