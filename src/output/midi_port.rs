//! MIDI port sinks
//!
//! The real transport opens a midir output connection by port-name
//! substring. The capture sink records encoded bytes for tests.

use super::OutputSink;
use crate::midi::find_port_by_substring;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// midir-backed output sink
pub struct MidiPortSink {
    name: String,
    connection: midir::MidiOutputConnection,
}

impl MidiPortSink {
    /// Open a MIDI output port whose name contains `port_substring`
    pub fn open(client_name: &str, port_substring: &str) -> Result<Self> {
        let midi_out = midir::MidiOutput::new(client_name)?;

        let port = find_port_by_substring(&midi_out, port_substring)
            .ok_or_else(|| anyhow!("Output port '{}' not found", port_substring))?;

        let port_name = midi_out.port_name(&port)?;
        let connection = midi_out
            .connect(&port, client_name)
            .map_err(|e| anyhow!("Failed to connect to '{}': {}", port_substring, e))?;

        Ok(Self {
            name: port_name,
            connection,
        })
    }
}

#[async_trait]
impl OutputSink for MidiPortSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.connection
            .send(data)
            .map_err(|e| anyhow!("MIDI send error on '{}': {}", self.name, e))
    }
}

/// Shared log of (port name, encoded bytes) pairs
pub type CaptureLog = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// Test sink that records every message instead of sending it
pub struct CaptureSink {
    name: String,
    log: CaptureLog,
}

impl CaptureSink {
    pub fn new(name: impl Into<String>, log: CaptureLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }

    /// Create an empty shared log for a group of capture sinks
    pub fn shared_log() -> CaptureLog {
        Arc::new(Mutex::new(Vec::new()))
    }
}

#[async_trait]
impl OutputSink for CaptureSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.log.lock().push((self.name.clone(), data.to_vec()));
        Ok(())
    }
}

/// Test sink whose sends always fail (fault-path testing)
pub struct FailingSink {
    name: String,
}

impl FailingSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl OutputSink for FailingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, _data: &[u8]) -> Result<()> {
        Err(anyhow!("port '{}' is wedged", self.name))
    }
}
