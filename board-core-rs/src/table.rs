//! Static channel table.
//!
//! All deployments (four, five and thirty rate boards) run the same core and
//! differ only in this table. It is validated once at startup:
//!
//! - channel codes are unique single characters, never digits or whitespace
//! - module ids contain no digits or whitespace
//! - every `(module_id, slot_index)` pair has at most one owner
//! - no module id equals a channel code (both share the wire identifier space)
//! - no two module ids map to the same persisted key

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ConfigError;
use crate::overflow::OverflowRegistry;
use crate::types::{Channel, ChannelCode, SlotIndex};

/// Separator used in batch submissions; never valid inside an identifier
const ENTRY_SEPARATOR: char = ',';

/// Validated channel/module assignment table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChannelSpec", into = "Vec<Channel>")]
pub struct ChannelTable {
    channels: Vec<Channel>,
    registry: OverflowRegistry,
}

/// Config file form of a table: a named preset or an explicit list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ChannelSpec {
    Preset { preset: String },
    List(Vec<Channel>),
}

impl TryFrom<ChannelSpec> for ChannelTable {
    type Error = ConfigError;

    fn try_from(spec: ChannelSpec) -> Result<Self, Self::Error> {
        match spec {
            ChannelSpec::Preset { preset } => ChannelTable::preset(&preset),
            ChannelSpec::List(channels) => ChannelTable::new(channels),
        }
    }
}

impl From<ChannelTable> for Vec<Channel> {
    fn from(table: ChannelTable) -> Self {
        table.channels
    }
}

impl ChannelTable {
    /// Validate a list of channels
    pub fn new(channels: Vec<Channel>) -> Result<Self, ConfigError> {
        if channels.is_empty() {
            return Err(ConfigError::EmptyTable);
        }

        let mut codes = HashSet::new();
        for channel in &channels {
            if !is_identifier_char(channel.code) {
                return Err(ConfigError::InvalidChannelCode(channel.code));
            }
            if !codes.insert(channel.code) {
                return Err(ConfigError::DuplicateChannel(channel.code));
            }
            if channel.module_id.is_empty() || !channel.module_id.chars().all(is_identifier_char) {
                return Err(ConfigError::InvalidModuleId(channel.module_id.clone()));
            }
        }

        let registry = OverflowRegistry::from_channels(&channels)?;

        let mut storage_keys = HashSet::new();
        for module_id in registry.module_ids() {
            let mut chars = module_id.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                if codes.contains(&c) {
                    return Err(ConfigError::IdentifierCollision(module_id.to_string()));
                }
            }
            if !storage_keys.insert(module_id.to_lowercase()) {
                return Err(ConfigError::IdentifierCollision(module_id.to_string()));
            }
        }

        Ok(Self { channels, registry })
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "five_currency" => Ok(Self::five_currency()),
            "four_plus_one" => Ok(Self::four_plus_one()),
            "thirty_rate" => Ok(Self::thirty_rate()),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }

    /// Five currencies: A-D share module E, JPY uses module G
    pub fn five_currency() -> Self {
        Self::from_static(&[
            ('A', "USD", "E", 3),
            ('B', "GBP", "E", 2),
            ('C', "EUR", "E", 1),
            ('D', "CAN", "E", 0),
            ('F', "JPY", "G", 3),
        ])
    }

    /// Four currencies on module Z plus JPY on module Y
    pub fn four_plus_one() -> Self {
        Self::from_static(&[
            ('A', "USD", "Z", 3),
            ('B', "GBP", "Z", 2),
            ('C', "EUR", "Z", 1),
            ('D', "CAN", "Z", 0),
            ('E', "JPY", "Y", 3),
        ])
    }

    /// Thirty rates: five currencies by six rate types over eight modules
    pub fn thirty_rate() -> Self {
        const CURRENCIES: [&str; 5] = ["USD", "GBP", "EUR", "JPY", "CAN"];
        const RATE_TYPES: [&str; 6] = ["TTB", "TTS", "BLB", "BLS", "FCB", "FCS"];
        const MODULES: [&str; 8] = ["ZZ", "YY", "XX", "WW", "VV", "UU", "TT", "SS"];

        let codes = ('A'..='Z').chain('a'..='d');
        let channels = codes
            .enumerate()
            .filter_map(|(i, code)| {
                let name = format!("{}_{}", CURRENCIES[i % 5], RATE_TYPES[i / 5]);
                // Modules fill from the highest slot down
                SlotIndex::new(3 - (i % 4) as u8)
                    .map(|slot| Channel::new(code, name, MODULES[i / 4], slot))
            })
            .collect::<Vec<_>>();

        Self::unchecked(channels)
    }

    fn from_static(rows: &[(ChannelCode, &str, &str, u8)]) -> Self {
        let channels = rows
            .iter()
            .filter_map(|&(code, name, module, slot)| {
                SlotIndex::new(slot).map(|slot| Channel::new(code, name, module, slot))
            })
            .collect();
        Self::unchecked(channels)
    }

    /// Presets are covered by tests; building them cannot fail
    fn unchecked(channels: Vec<Channel>) -> Self {
        let registry = OverflowRegistry::from_channels(&channels).unwrap_or_else(|e| {
            unreachable!("preset channel table is invalid: {e}")
        });
        Self { channels, registry }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn get(&self, code: ChannelCode) -> Option<&Channel> {
        self.channels.iter().find(|c| c.code == code)
    }

    pub fn registry(&self) -> &OverflowRegistry {
        &self.registry
    }

    /// Overflow module ids in sorted order
    pub fn module_ids(&self) -> impl Iterator<Item = &str> {
        self.registry.module_ids()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::five_currency()
    }
}

/// One printable ASCII byte on the wire
fn is_identifier_char(c: char) -> bool {
    c.is_ascii_graphic() && !c.is_ascii_digit() && c != ENTRY_SEPARATOR
}
