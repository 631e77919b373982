//! Core types for the rate board: channels, slots and wire commands

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Wire identifier of a channel's main module
pub type ChannelCode = char;

/// Wire identifier of a shared overflow module
pub type ModuleId = String;

/// Digits shown by a main module
pub const MAIN_WIDTH: usize = 4;

/// Single-digit slots in an overflow module
pub const SLOTS_PER_MODULE: usize = 4;

/// Main module content for a channel that was never written
pub const ZERO_MAIN: &str = "0000";

/// Slot position inside an overflow module (0-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotIndex(u8);

impl SlotIndex {
    pub fn new(index: u8) -> Option<Self> {
        ((index as usize) < SLOTS_PER_MODULE).then_some(Self(index))
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for SlotIndex {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SlotIndex::new(value).ok_or(ConfigError::SlotOutOfRange(value))
    }
}

impl From<SlotIndex> for u8 {
    fn from(value: SlotIndex) -> Self {
        value.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One independently addressable rate slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub code: ChannelCode,
    pub display_name: String,
    pub module_id: ModuleId,
    pub slot_index: SlotIndex,
}

impl Channel {
    pub fn new(
        code: ChannelCode,
        display_name: impl Into<String>,
        module_id: impl Into<String>,
        slot_index: SlotIndex,
    ) -> Self {
        Self {
            code,
            display_name: display_name.into(),
            module_id: module_id.into(),
            slot_index,
        }
    }
}

/// A single wire command: identifier followed by exactly four digits.
///
/// The production protocol has no length prefix and no terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    target: String,
    digits: String,
}

impl Command {
    /// Command addressed to a channel's main module
    pub fn main(code: ChannelCode, digits: &str) -> Self {
        debug_assert!(is_digits(digits, MAIN_WIDTH));
        Self {
            target: code.to_string(),
            digits: digits.to_string(),
        }
    }

    /// Command carrying the full content of an overflow module
    pub fn module(module_id: &str, slots: &crate::overflow::SlotContent) -> Self {
        Self {
            target: module_id.to_string(),
            digits: crate::overflow::join_slots(slots),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.target.len() + self.digits.len());
        bytes.extend_from_slice(self.target.as_bytes());
        bytes.extend_from_slice(self.digits.as_bytes());
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.target, self.digits)
    }
}

/// Exactly `width` ASCII digits
pub fn is_digits(s: &str, width: usize) -> bool {
    s.len() == width && s.bytes().all(|b| b.is_ascii_digit())
}

/// Current local time as an ISO-8601 string
pub fn timestamp_now() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false)
}
