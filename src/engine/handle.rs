//! Engine handle
//!
//! Cloneable façade over the engine actor's channels. Key events and ticks
//! are fire-and-forget; registration commands and snapshots await a
//! response. All methods are non-blocking for the caller.

use super::commands::{EngineCommand, KeyEvent, PanicCommand, RegistrationAck, RegistrationCommand};
use super::tracker::EngineSnapshot;
use crate::error::RegistrationError;
use crate::registry::Division;
use tokio::sync::{mpsc, oneshot};

/// Handle for interacting with the engine actor
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    panic_tx: mpsc::UnboundedSender<PanicCommand>,
}

impl EngineHandle {
    pub(crate) fn new(
        cmd_tx: mpsc::UnboundedSender<EngineCommand>,
        panic_tx: mpsc::UnboundedSender<PanicCommand>,
    ) -> Self {
        Self { cmd_tx, panic_tx }
    }

    /// Deliver a key event (fire-and-forget; the console transport must
    /// never block on the engine)
    pub fn key_event(&self, event: KeyEvent) {
        let _ = self.cmd_tx.send(EngineCommand::Key(event));
    }

    /// Deliver a registration command without waiting for the outcome
    /// (stop-tab input path). Panic is routed to the priority lane.
    pub fn registration(&self, command: RegistrationCommand) {
        if matches!(command, RegistrationCommand::Panic) {
            let _ = self.panic_tx.send(PanicCommand { response: None });
            return;
        }
        let _ = self.cmd_tx.send(EngineCommand::Registration {
            command,
            response: None,
        });
    }

    /// Deliver a registration command and report what it did
    pub async fn registration_with_ack(
        &self,
        command: RegistrationCommand,
    ) -> Result<RegistrationAck, RegistrationError> {
        if matches!(command, RegistrationCommand::Panic) {
            let addresses = self.panic().await;
            return Ok(RegistrationAck::Panic { addresses });
        }

        let (response_tx, response_rx) = oneshot::channel();
        let cmd = EngineCommand::Registration {
            command,
            response: Some(response_tx),
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Err(RegistrationError::EngineUnavailable);
        }

        response_rx
            .await
            .unwrap_or(Err(RegistrationError::EngineUnavailable))
    }

    /// Toggle a stop; reports the new drawn state
    pub async fn toggle_stop(&self, id: &str) -> Result<RegistrationAck, RegistrationError> {
        self.registration_with_ack(RegistrationCommand::ToggleStop(id.to_string()))
            .await
    }

    /// Toggle a coupler; reports the new engaged state
    pub async fn toggle_coupler(&self, id: &str) -> Result<RegistrationAck, RegistrationError> {
        self.registration_with_ack(RegistrationCommand::ToggleCoupler(id.to_string()))
            .await
    }

    /// Move a swell box
    pub async fn set_swell(
        &self,
        division: Division,
        position: u8,
    ) -> Result<RegistrationAck, RegistrationError> {
        self.registration_with_ack(RegistrationCommand::SetSwell { division, position })
            .await
    }

    /// Engage or disengage a tremulant group
    pub async fn set_tremulant(
        &self,
        group: &str,
        engaged: bool,
    ) -> Result<RegistrationAck, RegistrationError> {
        self.registration_with_ack(RegistrationCommand::SetTremulant {
            group: group.to_string(),
            engaged,
        })
        .await
    }

    /// Withdraw all drawn stops (held keys and sounding notes untouched)
    pub async fn all_clear(&self) -> Result<RegistrationAck, RegistrationError> {
        self.registration_with_ack(RegistrationCommand::AllClear)
            .await
    }

    /// Emergency silence with priority over queued ordinary events;
    /// returns the number of addresses swept
    pub async fn panic(&self) -> usize {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .panic_tx
            .send(PanicCommand {
                response: Some(response_tx),
            })
            .is_err()
        {
            return 0;
        }
        response_rx.await.unwrap_or(0)
    }

    /// Consistent read of the whole engine state
    pub async fn snapshot(&self) -> EngineSnapshot {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(EngineCommand::Snapshot {
                response: response_tx,
            })
            .is_err()
        {
            return EngineSnapshot::default();
        }
        response_rx.await.unwrap_or_default()
    }

    /// Advance the tremulant oscillators one tick (sent by the clock task)
    pub fn tremulant_tick(&self) {
        let _ = self.cmd_tx.send(EngineCommand::TremulantTick);
    }

    /// Whether the engine actor is still running
    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}
