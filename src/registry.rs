//! Rank Address Registry
//!
//! Static table mapping rank ids to output addresses. Built once at startup
//! from configuration and immutable for the process lifetime. Rejects
//! duplicate rank ids and duplicate addresses at load time: one rank per
//! channel per destination.

use crate::config::{RankConfig, TremulantConfig};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Organ divisions (manuals and pedalboard)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Division {
    Great,
    Swell,
    Choir,
    Pedal,
}

impl Division {
    /// All divisions
    pub fn all() -> &'static [Division] {
        &[
            Division::Great,
            Division::Swell,
            Division::Choir,
            Division::Pedal,
        ]
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "great" => Some(Division::Great),
            "swell" => Some(Division::Swell),
            "choir" => Some(Division::Choir),
            "pedal" => Some(Division::Pedal),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Division::Great => "great",
            Division::Swell => "swell",
            Division::Choir => "choir",
            Division::Pedal => "pedal",
        }
    }
}

impl fmt::Display for Division {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output destination kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Pipe-rank relay hardware
    Physical,
    /// Sample-playback engine channel
    Virtual,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Physical => write!(f, "physical"),
            Destination::Virtual => write!(f, "virtual"),
        }
    }
}

/// One addressable output: a channel on a named port of a destination.
///
/// Two addresses are equal iff destination, port and channel match;
/// `program` is preload metadata and excluded from identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankAddress {
    pub destination: Destination,
    pub port: String,
    pub channel: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<u8>,
}

impl PartialEq for RankAddress {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination
            && self.port == other.port
            && self.channel == other.channel
    }
}

impl Eq for RankAddress {}

impl Hash for RankAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.destination.hash(state);
        self.port.hash(state);
        self.channel.hash(state);
    }
}

impl fmt::Display for RankAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.destination, self.port, self.channel)
    }
}

/// One playable sound source (pipe set or digital voice) at one address
#[derive(Debug, Clone, Serialize)]
pub struct Rank {
    pub id: String,
    pub name: String,
    pub address: RankAddress,
    /// Lowest playable note
    pub first_note: u8,
    /// Highest playable note
    pub last_note: u8,
    /// Member of a tremulant group (derived at load)
    pub tremmed: bool,
    /// Swell box enclosing this rank, if any
    pub enclosed_in: Option<Division>,
}

impl Rank {
    /// Whether a note falls inside the rank's playable compass
    pub fn in_range(&self, note: u8) -> bool {
        note >= self.first_note && note <= self.last_note
    }
}

/// Static rank table: id -> rank, built once at startup
#[derive(Debug)]
pub struct RankRegistry {
    ranks: HashMap<String, Rank>,
}

impl RankRegistry {
    /// Build the registry from configuration, enforcing uniqueness rules
    pub fn from_config(
        ranks: &[RankConfig],
        tremulants: &[TremulantConfig],
    ) -> Result<Self, ConfigError> {
        // Ranks named by any tremulant group are tremmed
        let mut tremmed_ranks: HashSet<&str> = HashSet::new();
        for group in tremulants {
            for rank_id in &group.ranks {
                tremmed_ranks.insert(rank_id.as_str());
            }
        }

        let mut table: HashMap<String, Rank> = HashMap::new();
        let mut by_address: HashMap<RankAddress, String> = HashMap::new();

        for rc in ranks {
            if table.contains_key(&rc.id) {
                return Err(ConfigError::DuplicateRank(rc.id.clone()));
            }

            let address = RankAddress {
                destination: rc.destination,
                port: rc.port.clone(),
                channel: rc.channel,
                program: rc.program,
            };

            if let Some(first) = by_address.get(&address) {
                return Err(ConfigError::DuplicateAddress {
                    first: first.clone(),
                    second: rc.id.clone(),
                    address: address.to_string(),
                });
            }
            by_address.insert(address.clone(), rc.id.clone());

            let rank = Rank {
                id: rc.id.clone(),
                name: rc.name.clone().unwrap_or_else(|| rc.id.clone()),
                address,
                first_note: rc.first_note,
                last_note: rc.last_note,
                tremmed: tremmed_ranks.contains(rc.id.as_str()),
                enclosed_in: rc.enclosed_in,
            };
            table.insert(rank.id.clone(), rank);
        }

        // Every tremulant member must exist
        for group in tremulants {
            for rank_id in &group.ranks {
                if !table.contains_key(rank_id) {
                    return Err(ConfigError::UnknownTremulantRank {
                        group: group.id.clone(),
                        rank: rank_id.clone(),
                    });
                }
            }
        }

        Ok(Self { ranks: table })
    }

    /// Look up a rank by id
    pub fn resolve(&self, rank_id: &str) -> Result<&Rank, ConfigError> {
        self.ranks
            .get(rank_id)
            .ok_or_else(|| ConfigError::UnknownRank(rank_id.to_string()))
    }

    /// Whether a rank id is present
    pub fn contains(&self, rank_id: &str) -> bool {
        self.ranks.contains_key(rank_id)
    }

    /// Iterate over all ranks
    pub fn ranks(&self) -> impl Iterator<Item = &Rank> {
        self.ranks.values()
    }

    /// Every known output address, deduplicated (panic sweeps all of these)
    pub fn all_addresses(&self) -> Vec<RankAddress> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for rank in self.ranks.values() {
            if seen.insert(rank.address.clone()) {
                out.push(rank.address.clone());
            }
        }
        out
    }

    /// Number of ranks
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}
