//! Output dispatch to rank relays and virtual voices
//!
//! The dispatcher owns one worker task per distinct output port. A rank
//! address lives on exactly one port, so per-port serialization preserves
//! the order the engine emitted for every address. Panic traffic travels on
//! a separate urgent lane that workers drain first.
//!
//! A send that fails or exceeds the bounded timeout marks that address
//! faulted: its messages are dropped from then on and the address shows up
//! in the status snapshot's degraded list. Other addresses are unaffected.

pub mod midi_port;

pub use midi_port::{CaptureSink, MidiPortSink};

use crate::midi::MidiMessage;
use crate::registry::{Destination, RankAddress, RankRegistry};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Bounded timeout for one transport write
pub const SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Depth of each port's ordinary message queue
const PORT_QUEUE_DEPTH: usize = 1024;

/// One output transport (a MIDI port or a test capture)
///
/// All methods take `&mut self`; each sink is owned by exactly one worker.
#[async_trait]
pub trait OutputSink: Send {
    /// Port name for logging
    fn name(&self) -> &str;

    /// Write one encoded MIDI message to the transport
    async fn send(&mut self, data: &[u8]) -> Result<()>;
}

/// A message bound for one output address
#[derive(Debug, Clone)]
pub struct OutMessage {
    pub address: RankAddress,
    pub message: MidiMessage,
}

/// Addresses that have faulted since startup
#[derive(Default)]
pub struct FaultList {
    inner: RwLock<BTreeSet<String>>,
}

impl FaultList {
    /// Mark an address as degraded
    pub fn mark(&self, address: &RankAddress) {
        self.inner.write().insert(address.to_string());
    }

    /// Whether an address has faulted
    pub fn is_faulted(&self, address: &RankAddress) -> bool {
        self.inner.read().contains(&address.to_string())
    }

    /// Degraded addresses, sorted
    pub fn list(&self) -> Vec<String> {
        self.inner.read().iter().cloned().collect()
    }

    /// Whether any address has faulted
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Worker key: a port is unique per destination
type PortKey = (Destination, String);

struct PortLanes {
    tx: mpsc::Sender<OutMessage>,
    urgent_tx: mpsc::UnboundedSender<OutMessage>,
}

/// Cloneable handle for emitting messages to output addresses
#[derive(Clone)]
pub struct DispatcherHandle {
    ports: Arc<HashMap<PortKey, PortLanes>>,
    faults: Arc<FaultList>,
}

impl DispatcherHandle {
    /// Queue a message for an address, preserving per-address order
    pub fn send(&self, address: &RankAddress, message: MidiMessage) {
        self.dispatch(address, message, false);
    }

    /// Queue a message ahead of ordinary traffic (panic lane)
    pub fn send_urgent(&self, address: &RankAddress, message: MidiMessage) {
        self.dispatch(address, message, true);
    }

    fn dispatch(&self, address: &RankAddress, message: MidiMessage, urgent: bool) {
        let key = (address.destination, address.port.clone());
        let Some(lanes) = self.ports.get(&key) else {
            warn!("No output port for address {}", address);
            return;
        };

        if self.faults.is_faulted(address) {
            trace!("Dropping message for faulted address {}", address);
            return;
        }

        let out = OutMessage {
            address: address.clone(),
            message,
        };

        if urgent {
            if lanes.urgent_tx.send(out).is_err() {
                warn!("Urgent lane closed for port {}", address.port);
            }
            return;
        }

        match lanes.tx.try_send(out) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(out)) => {
                // A full queue means the port is not draining
                warn!(
                    "Output queue full for port {}, marking {} faulted",
                    address.port, out.address
                );
                self.faults.mark(&out.address);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Output worker gone for port {}", address.port);
            }
        }
    }

    /// Shared fault list (surfaced in status snapshots)
    pub fn faults(&self) -> Arc<FaultList> {
        self.faults.clone()
    }
}

/// Spawns per-port workers and preloads virtual rank programs
pub struct OutputDispatcher;

impl OutputDispatcher {
    /// Create workers for every distinct port in the registry.
    ///
    /// `make_sink` opens the transport for one (destination, port) pair;
    /// failing to open a port is fatal at startup, not a runtime fault.
    pub fn spawn<F>(registry: &RankRegistry, mut make_sink: F) -> Result<DispatcherHandle>
    where
        F: FnMut(Destination, &str) -> Result<Box<dyn OutputSink>>,
    {
        let faults = Arc::new(FaultList::default());
        let mut ports: HashMap<PortKey, PortLanes> = HashMap::new();

        for rank in registry.ranks() {
            let key = (rank.address.destination, rank.address.port.clone());
            if ports.contains_key(&key) {
                continue;
            }

            let sink = make_sink(key.0, &key.1)?;
            let (tx, rx) = mpsc::channel(PORT_QUEUE_DEPTH);
            let (urgent_tx, urgent_rx) = mpsc::unbounded_channel();

            tokio::spawn(run_port_worker(sink, rx, urgent_rx, faults.clone()));
            debug!("Output worker started for {} port '{}'", key.0, key.1);

            ports.insert(key, PortLanes { tx, urgent_tx });
        }

        let handle = DispatcherHandle {
            ports: Arc::new(ports),
            faults,
        };

        // Preload programs on virtual ranks
        for rank in registry.ranks() {
            if rank.address.destination == Destination::Virtual {
                if let Some(program) = rank.address.program {
                    handle.send(
                        &rank.address,
                        MidiMessage::ProgramChange {
                            channel: rank.address.channel,
                            program,
                        },
                    );
                }
            }
        }

        Ok(handle)
    }
}

/// One port's drain loop: urgent lane first, then ordinary traffic
async fn run_port_worker(
    mut sink: Box<dyn OutputSink>,
    mut rx: mpsc::Receiver<OutMessage>,
    mut urgent_rx: mpsc::UnboundedReceiver<OutMessage>,
    faults: Arc<FaultList>,
) {
    loop {
        let out = tokio::select! {
            biased;
            Some(out) = urgent_rx.recv() => out,
            Some(out) = rx.recv() => out,
            else => break,
        };

        if faults.is_faulted(&out.address) {
            trace!("Skipping faulted address {}", out.address);
            continue;
        }

        let data = out.message.encode();
        match timeout(SEND_TIMEOUT, sink.send(&data)).await {
            Ok(Ok(())) => {
                trace!("TX {} | {}", out.address, out.message);
            }
            Ok(Err(e)) => {
                warn!("Send failed for {}: {}, marking faulted", out.address, e);
                faults.mark(&out.address);
            }
            Err(_) => {
                warn!(
                    "Send timed out for {} after {:?}, marking faulted",
                    out.address, SEND_TIMEOUT
                );
                faults.mark(&out.address);
            }
        }
    }

    debug!("Output worker for '{}' stopped", sink.name());
}
