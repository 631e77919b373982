//! Overflow module slot packing.
//!
//! Each overflow module shows four single digits. Every slot is statically
//! owned by at most one channel, which uses it to carry the fifth digit of its
//! rate. Writing a channel's digit must leave the neighbouring slots exactly
//! as they were, because the whole module is always re-sent as one command.

use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::types::{Channel, ChannelCode, ModuleId, SlotIndex, SLOTS_PER_MODULE};

/// Content of one overflow module
pub type SlotContent = [char; SLOTS_PER_MODULE];

/// Content of a module no channel has written yet
pub const EMPTY_SLOTS: SlotContent = ['0'; SLOTS_PER_MODULE];

/// Replace one slot, preserving the rest
pub fn update_slot(current: &SlotContent, slot: SlotIndex, digit: char) -> SlotContent {
    let mut next = *current;
    next[slot.get()] = digit;
    next
}

/// Wire form of a module's content
pub fn join_slots(slots: &SlotContent) -> String {
    slots.iter().collect()
}

/// Static slot ownership for every overflow module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowRegistry {
    owners: BTreeMap<ModuleId, [Option<ChannelCode>; SLOTS_PER_MODULE]>,
}

impl OverflowRegistry {
    /// Build the ownership map, rejecting two channels on one slot
    pub fn from_channels(channels: &[Channel]) -> Result<Self, ConfigError> {
        let mut owners: BTreeMap<ModuleId, [Option<ChannelCode>; SLOTS_PER_MODULE]> =
            BTreeMap::new();

        for channel in channels {
            let slots = owners
                .entry(channel.module_id.clone())
                .or_insert([None; SLOTS_PER_MODULE]);
            let slot = &mut slots[channel.slot_index.get()];
            if let Some(first) = *slot {
                return Err(ConfigError::DuplicateSlot {
                    module_id: channel.module_id.clone(),
                    slot: channel.slot_index.into(),
                    first,
                    second: channel.code,
                });
            }
            *slot = Some(channel.code);
        }

        Ok(Self { owners })
    }

    /// Module ids in sorted order
    pub fn module_ids(&self) -> impl Iterator<Item = &str> {
        self.owners.keys().map(String::as_str)
    }

    /// Channel owning a slot, if any
    pub fn owner(&self, module_id: &str, slot: SlotIndex) -> Option<ChannelCode> {
        self.owners.get(module_id).and_then(|s| s[slot.get()])
    }

    /// Slots of a module no channel writes; these stay '0' forever
    pub fn unused_slots(&self, module_id: &str) -> Vec<SlotIndex> {
        let Some(slots) = self.owners.get(module_id) else {
            return Vec::new();
        };
        slots
            .iter()
            .enumerate()
            .filter(|(_, owner)| owner.is_none())
            .filter_map(|(i, _)| SlotIndex::new(i as u8))
            .collect()
    }
}
