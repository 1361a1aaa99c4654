//! Unified operator actions
//!
//! One implementation of every control action, shared by the interactive
//! console and the HTTP surface. Stop ids are accepted case-insensitively;
//! all mutation goes through the engine handle.

use crate::engine::{
    EngineHandle, EngineSnapshot, KeyEvent, RegistrationAck, RegistrationCommand,
};
use crate::error::RegistrationError;
use crate::registry::{Division, RankRegistry};
use crate::stops::StopTable;
use serde::Serialize;
use std::sync::Arc;

/// One stop in a listing
#[derive(Debug, Clone, Serialize)]
pub struct StopInfo {
    pub id: String,
    pub name: String,
    pub division: Division,
    pub active: bool,
}

/// Condensed system status
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub active_stops: Vec<StopInfo>,
    pub engaged_couplers: Vec<String>,
    pub active_keys_count: usize,
    pub active_notes_count: usize,
    pub degraded_outputs: Vec<String>,
}

/// Shared action layer over the engine
pub struct Actions {
    engine: EngineHandle,
    stops: Arc<StopTable>,
    registry: Arc<RankRegistry>,
}

impl Actions {
    pub fn new(engine: EngineHandle, stops: Arc<StopTable>, registry: Arc<RankRegistry>) -> Self {
        Self {
            engine,
            stops,
            registry,
        }
    }

    /// Resolve an operator-typed stop id to its canonical form
    fn resolve_stop_id(&self, raw: &str) -> Result<String, RegistrationError> {
        self.stops
            .stop_ignore_case(raw)
            .map(|s| s.id.clone())
            .ok_or_else(|| RegistrationError::UnknownStop(raw.to_string()))
    }

    /// Toggle a stop by id
    pub async fn toggle_stop(&self, raw: &str) -> Result<RegistrationAck, RegistrationError> {
        let id = self.resolve_stop_id(raw)?;
        self.engine.toggle_stop(&id).await
    }

    /// Draw a stop; drawing an already-drawn stop is a no-op
    pub async fn draw_stop(&self, raw: &str) -> Result<RegistrationAck, RegistrationError> {
        self.set_stop(raw, true).await
    }

    /// Retire a stop; retiring an undrawn stop is a no-op
    pub async fn retire_stop(&self, raw: &str) -> Result<RegistrationAck, RegistrationError> {
        self.set_stop(raw, false).await
    }

    async fn set_stop(
        &self,
        raw: &str,
        desired: bool,
    ) -> Result<RegistrationAck, RegistrationError> {
        let id = self.resolve_stop_id(raw)?;
        let snapshot = self.engine.snapshot().await;

        if snapshot.drawn_stops.contains(&id) == desired {
            let name = self
                .stops
                .stop(&id)
                .map(|s| s.display_name().to_string())
                .unwrap_or_else(|| id.clone());
            return Ok(RegistrationAck::Stop {
                id,
                name,
                drawn: desired,
            });
        }

        self.engine.toggle_stop(&id).await
    }

    /// Toggle a coupler by id
    pub async fn toggle_coupler(&self, id: &str) -> Result<RegistrationAck, RegistrationError> {
        self.engine.toggle_coupler(id).await
    }

    /// Move a swell box
    pub async fn set_swell(
        &self,
        division: Division,
        position: u8,
    ) -> Result<RegistrationAck, RegistrationError> {
        self.engine.set_swell(division, position).await
    }

    /// Engage or disengage a tremulant group
    pub async fn set_tremulant(
        &self,
        group: &str,
        engaged: bool,
    ) -> Result<RegistrationAck, RegistrationError> {
        self.engine.set_tremulant(group, engaged).await
    }

    /// Withdraw every drawn stop; returns how many were drawn
    pub async fn all_clear(&self) -> Result<usize, RegistrationError> {
        match self.engine.all_clear().await? {
            RegistrationAck::AllClear { withdrawn } => Ok(withdrawn),
            _ => Ok(0),
        }
    }

    /// Emergency silence; returns the number of addresses swept
    pub async fn panic(&self) -> usize {
        self.engine.panic().await
    }

    /// List stops, optionally filtered by division, with drawn state
    pub async fn list_stops(&self, division: Option<Division>) -> Vec<StopInfo> {
        let snapshot = self.engine.snapshot().await;
        let divisions: Vec<Division> = match division {
            Some(d) => vec![d],
            None => Division::all().to_vec(),
        };

        let mut out = Vec::new();
        for d in divisions {
            for stop in self.stops.stops_for(d) {
                out.push(StopInfo {
                    id: stop.id.clone(),
                    name: stop.display_name().to_string(),
                    division: stop.division,
                    active: snapshot.drawn_stops.contains(&stop.id),
                });
            }
        }
        out
    }

    /// Ids of currently drawn stops
    pub async fn active_stops(&self) -> Vec<String> {
        self.engine.snapshot().await.drawn_stops
    }

    /// Condensed status for dashboards
    pub async fn status(&self) -> StatusReport {
        let snapshot = self.engine.snapshot().await;

        let active_stops = snapshot
            .drawn_stops
            .iter()
            .filter_map(|id| self.stops.stop(id))
            .map(|stop| StopInfo {
                id: stop.id.clone(),
                name: stop.display_name().to_string(),
                division: stop.division,
                active: true,
            })
            .collect();

        StatusReport {
            active_stops,
            engaged_couplers: snapshot.engaged_couplers.clone(),
            active_keys_count: snapshot.held_keys.len(),
            active_notes_count: snapshot.sounding_notes.len(),
            degraded_outputs: snapshot.degraded_outputs,
        }
    }

    /// Full engine state
    pub async fn state(&self) -> EngineSnapshot {
        self.engine.snapshot().await
    }

    /// Simulate a key press or release (testing without a console)
    pub fn simulate_key(&self, division: Division, note: u8, down: bool) {
        self.engine.key_event(KeyEvent {
            division,
            note,
            down,
            velocity: 64,
            timestamp: crate::engine::now_ms(),
        });
    }

    /// Fire a registration command without waiting for the outcome
    pub fn registration(&self, command: RegistrationCommand) {
        self.engine.registration(command);
    }

    /// Known tremulant group ids (for listings)
    pub async fn tremulant_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .engine
            .snapshot()
            .await
            .tremulants
            .keys()
            .cloned()
            .collect();
        groups.sort();
        groups
    }

    /// Number of configured ranks
    pub fn rank_count(&self) -> usize {
        self.registry.len()
    }
}
