//! Configuration management
//!
//! Handles loading and parsing of the YAML configuration that populates the
//! Rank Address Registry and the Stop & Coupler Definition Table, plus the
//! console input map and the API/modulation settings. Loaded once at
//! startup; there is no hot-reload.

use crate::registry::{Destination, Division};
use crate::stops::{Coupler, Stop};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrganConfig {
    pub ranks: Vec<RankConfig>,
    pub stops: Vec<Stop>,
    #[serde(default)]
    pub couplers: Vec<Coupler>,
    #[serde(default)]
    pub tremulants: Vec<TremulantConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputConfig>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub modulation: ModulationConfig,
}

/// One rank: a physical pipe set or a virtual voice at one output address
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RankConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub destination: Destination,
    /// Output port name (substring match against the system's MIDI ports)
    pub port: String,
    pub channel: u8,
    /// Program preloaded on virtual ranks at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<u8>,
    #[serde(default = "default_first_note")]
    pub first_note: u8,
    #[serde(default = "default_last_note")]
    pub last_note: u8,
    /// Swell box enclosing this rank, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosed_in: Option<Division>,
}

/// A tremulant group: one oscillator modulating its member ranks
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TremulantConfig {
    pub id: String,
    #[serde(default = "default_trem_rate")]
    pub rate_hz: f32,
    /// Peak pitch-bend offset from center (0-8191)
    #[serde(default = "default_trem_depth")]
    pub depth: u16,
    pub ranks: Vec<String>,
}

/// Console input map: which MIDI channels carry which keyboards
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// Input port name (substring match)
    pub port: String,
    /// Keyboards by division (manuals and pedalboard alike)
    pub keyboards: HashMap<Division, KeyboardInput>,
    /// Stop-tab board, if the console has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_tabs: Option<StopTabsInput>,
}

/// One keyboard: a channel and its playable key compass.
/// Notes outside the compass are pistons and are ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyboardInput {
    pub channel: u8,
    pub first_note: u8,
    pub last_note: u8,
}

/// Stop-tab board: note numbers mapped to stop ids
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StopTabsInput {
    pub channel: u8,
    pub mappings: HashMap<u8, String>,
}

/// Status/control HTTP surface settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

/// Sanity bounds enforced at load time
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Extension/unification bound on stop pitch offsets, in semitones
    #[serde(default = "default_max_pitch_offset")]
    pub max_pitch_offset: i8,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_pitch_offset: default_max_pitch_offset(),
        }
    }
}

/// Continuous-modulation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModulationConfig {
    /// Tremulant oscillator tick interval in milliseconds
    #[serde(default = "default_trem_tick_ms")]
    pub tremulant_tick_ms: u64,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        Self {
            tremulant_tick_ms: default_trem_tick_ms(),
        }
    }
}

impl OrganConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Failed to parse config: {}", path))
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: OrganConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        Ok(config)
    }
}

// Default value functions
fn default_first_note() -> u8 {
    0
}
fn default_last_note() -> u8 {
    127
}
fn default_trem_rate() -> f32 {
    5.0
}
fn default_trem_depth() -> u16 {
    512
}
fn default_true() -> bool {
    true
}
fn default_api_port() -> u16 {
    5000
}
fn default_max_pitch_offset() -> i8 {
    24
}
fn default_trem_tick_ms() -> u64 {
    25
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
ranks:
  - id: M1
    name: "Great Principal rank"
    destination: physical
    port: "U6MIDI Pro"
    channel: 0
    first_note: 36
    last_note: 96
  - id: D-Mix
    destination: virtual
    port: "FS_Virtual"
    channel: 0
    program: 0

stops:
  - id: GREAT_PRINCIPAL_8
    name: "Principal 8'"
    division: great
    sources:
      - rank: M1
  - id: GREAT_MIXTURE
    division: great
    kind: digital
    sources:
      - rank: D-Mix

couplers:
  - id: SWELL_TO_GREAT
    from_division: great
    to_division: swell

tremulants:
  - id: swell_trem
    rate_hz: 5.5
    depth: 400
    ranks: [M1]

input:
  port: "Console"
  keyboards:
    great: { channel: 0, first_note: 36, last_note: 96 }
    pedal: { channel: 3, first_note: 36, last_note: 67 }
  stop_tabs:
    channel: 4
    mappings:
      1: GREAT_PRINCIPAL_8

api:
  port: 5001
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = OrganConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.ranks.len(), 2);
        assert_eq!(config.ranks[1].destination, Destination::Virtual);
        assert_eq!(config.ranks[1].program, Some(0));
        // Compass defaults to the full MIDI range
        assert_eq!(config.ranks[1].first_note, 0);
        assert_eq!(config.ranks[1].last_note, 127);

        assert_eq!(config.stops.len(), 2);
        assert_eq!(config.stops[0].division, Division::Great);
        assert_eq!(config.stops[0].pitch_offset, 0);

        assert_eq!(config.couplers.len(), 1);
        assert_eq!(config.couplers[0].octave_shift, 0);

        assert_eq!(config.tremulants[0].depth, 400);

        let input = config.input.unwrap();
        assert_eq!(input.keyboards[&Division::Pedal].channel, 3);
        assert_eq!(
            input.stop_tabs.unwrap().mappings[&1],
            "GREAT_PRINCIPAL_8"
        );

        assert_eq!(config.api.port, 5001);
        assert!(config.api.enabled);
        assert_eq!(config.limits.max_pitch_offset, 24);
        assert_eq!(config.modulation.tremulant_tick_ms, 25);
    }

    #[test]
    fn test_garbage_config_rejected() {
        assert!(OrganConfig::from_yaml("ranks: 12").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = OrganConfig::load(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.ranks.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = OrganConfig::load("/nonexistent/organ.yaml")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
