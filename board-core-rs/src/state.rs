//! Durable record of what was last successfully written to the board.
//!
//! Loading never fails: every expected channel and module is always present
//! afterwards, and anything missing or malformed in the file is replaced by
//! the zero value for exactly that field.
//!
//! Document layout:
//!
//! ```json
//! {
//!   "main_modules": {"A": "1234", "B": "0012"},
//!   "e_module": ["0", "0", "3", "5"],
//!   "g_module": ["0", "0", "0", "0"],
//!   "last_updated": "2025-06-01T12:00:00.000+02:00"
//! }
//! ```
//!
//! The older layout with a nested `"overflow_modules": {"ZZ": [...]}` object
//! is also accepted on load.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::overflow::{join_slots, SlotContent, EMPTY_SLOTS};
use crate::table::ChannelTable;
use crate::types::{is_digits, timestamp_now, Channel, ChannelCode, ModuleId, MAIN_WIDTH, SLOTS_PER_MODULE, ZERO_MAIN};

const MAIN_MODULES_KEY: &str = "main_modules";
const LEGACY_OVERFLOW_KEY: &str = "overflow_modules";
const LAST_UPDATED_KEY: &str = "last_updated";

/// Flat document key for a module, e.g. `E` -> `e_module`
pub fn module_key(module_id: &str) -> String {
    format!("{}_module", module_id.to_lowercase())
}

/// Snapshot of committed display content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedState {
    pub main_modules: BTreeMap<ChannelCode, String>,
    pub overflow_modules: BTreeMap<ModuleId, SlotContent>,
    pub last_updated: Option<String>,
}

impl PersistedState {
    /// Every channel at "0000", every module at "0000"
    pub fn zeroed(table: &ChannelTable) -> Self {
        Self {
            main_modules: table
                .channels()
                .iter()
                .map(|c| (c.code, ZERO_MAIN.to_string()))
                .collect(),
            overflow_modules: table
                .module_ids()
                .map(|m| (m.to_string(), EMPTY_SLOTS))
                .collect(),
            last_updated: None,
        }
    }

    /// Sanitizing overlay of a parsed document onto the zero state
    pub fn from_document(doc: &Value, table: &ChannelTable) -> Self {
        let mut state = Self::zeroed(table);

        let mains = doc.get(MAIN_MODULES_KEY).and_then(Value::as_object);
        for channel in table.channels() {
            let stored = mains
                .and_then(|m| m.get(&channel.code.to_string()))
                .and_then(Value::as_str);
            match stored {
                Some(v) if is_digits(v, MAIN_WIDTH) => {
                    state.main_modules.insert(channel.code, v.to_string());
                }
                Some(v) => {
                    warn!("State: Invalid main value {:?} for {}, using {}", v, channel.code, ZERO_MAIN);
                }
                None => {}
            }
        }

        let legacy = doc.get(LEGACY_OVERFLOW_KEY).and_then(Value::as_object);
        let mut migrated = Vec::new();
        for module_id in table.module_ids() {
            let stored = match doc.get(module_key(module_id)) {
                Some(value) => Some(value),
                None => {
                    let value = legacy.and_then(|m| m.get(module_id));
                    if value.is_some() {
                        migrated.push(module_id);
                    }
                    value
                }
            };
            if let Some(value) = stored {
                state
                    .overflow_modules
                    .insert(module_id.to_string(), sanitize_slots(module_id, value));
            }
        }
        if !migrated.is_empty() {
            info!(
                "State: Read {} from legacy \"{}\" layout, next save uses flat <id>_module keys",
                migrated.join(", "),
                LEGACY_OVERFLOW_KEY
            );
        }

        state.last_updated = doc
            .get(LAST_UPDATED_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);

        state
    }

    /// JSON document in the flat layout
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();

        let mains: Map<String, Value> = self
            .main_modules
            .iter()
            .map(|(code, digits)| (code.to_string(), Value::String(digits.clone())))
            .collect();
        doc.insert(MAIN_MODULES_KEY.to_string(), Value::Object(mains));

        for (module_id, slots) in &self.overflow_modules {
            let list = slots.iter().map(|c| Value::String(c.to_string())).collect();
            doc.insert(module_key(module_id), Value::Array(list));
        }

        doc.insert(
            LAST_UPDATED_KEY.to_string(),
            self.last_updated.clone().map_or(Value::Null, Value::String),
        );

        Value::Object(doc)
    }

    pub fn main(&self, code: ChannelCode) -> &str {
        self.main_modules.get(&code).map_or(ZERO_MAIN, String::as_str)
    }

    pub fn slots(&self, module_id: &str) -> SlotContent {
        self.overflow_modules.get(module_id).copied().unwrap_or(EMPTY_SLOTS)
    }

    /// Derived full value: main digits, plus the overflow digit unless it is '0'
    pub fn full_value(&self, channel: &Channel) -> String {
        let mut value = self.main(channel.code).to_string();
        let digit = self.slots(&channel.module_id)[channel.slot_index.get()];
        if digit != '0' {
            value.push(digit);
        }
        value
    }
}

/// Exactly four elements, each reduced to its first character if that is a digit
fn sanitize_slots(module_id: &str, value: &Value) -> SlotContent {
    let Some(list) = value.as_array().filter(|l| l.len() == SLOTS_PER_MODULE) else {
        warn!("State: Malformed slot list for module {}, using {}", module_id, join_slots(&EMPTY_SLOTS));
        return EMPTY_SLOTS;
    };

    let mut slots = EMPTY_SLOTS;
    for (slot, element) in slots.iter_mut().zip(list) {
        let first = match element {
            Value::String(s) => s.chars().next(),
            Value::Number(n) => n.to_string().chars().next(),
            _ => None,
        };
        *slot = first.filter(char::is_ascii_digit).unwrap_or('0');
    }
    slots
}

/// In-memory state plus the file it is persisted to
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: PersistedState,
}

impl StateStore {
    /// Default the state, then overlay whatever can be salvaged from `path`
    pub fn load(path: impl Into<PathBuf>, table: &ChannelTable) -> Self {
        let path = path.into();
        let state = match read_document(&path) {
            Ok(Some(doc)) => {
                info!("State: Loaded previous state from {:?}", path);
                PersistedState::from_document(&doc, table)
            }
            Ok(None) => {
                info!("State: No state file at {:?}, starting fresh", path);
                PersistedState::zeroed(table)
            }
            Err(e) => {
                warn!("State: Could not load {:?}: {}, starting fresh", path, e);
                PersistedState::zeroed(table)
            }
        };
        Self { path, state }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> &PersistedState {
        &self.state
    }

    pub fn get_full_value(&self, channel: &Channel) -> String {
        self.state.full_value(channel)
    }

    /// Stamp and write the current snapshot (temp file, then rename).
    ///
    /// On failure the in-memory state stays authoritative.
    pub fn save(&mut self) -> Result<(), PersistenceError> {
        self.state.last_updated = Some(timestamp_now());
        let result = write_document(&self.path, &self.state.to_document());
        match &result {
            Ok(()) => debug!("State: Saved to {:?}", self.path),
            Err(e) => warn!("State: {}", e),
        }
        result
    }

    /// Apply a fully successful update, then save
    pub fn commit(
        &mut self,
        channel: &Channel,
        main_digits: &str,
        module_id: &str,
        new_slots: SlotContent,
    ) -> Result<(), PersistenceError> {
        self.state
            .main_modules
            .insert(channel.code, main_digits.to_string());
        self.state
            .overflow_modules
            .insert(module_id.to_string(), new_slots);
        info!(
            "State: Committed {}={} {}={}",
            channel.code,
            main_digits,
            module_id,
            join_slots(&new_slots)
        );
        self.save()
    }

    /// Record a zeroed main module; the caller saves
    pub fn reset_main(&mut self, code: ChannelCode) {
        self.state.main_modules.insert(code, ZERO_MAIN.to_string());
    }

    /// Record a zeroed overflow module; the caller saves
    pub fn reset_module(&mut self, module_id: &str) {
        self.state
            .overflow_modules
            .insert(module_id.to_string(), EMPTY_SLOTS);
    }
}

/// `Ok(None)` when the file does not exist
pub(crate) fn read_document(path: &Path) -> std::io::Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    let doc = serde_json::from_str(&data)?;
    Ok(Some(doc))
}

pub(crate) fn write_document(path: &Path, doc: &Value) -> Result<(), PersistenceError> {
    let to_err = |source| PersistenceError {
        path: path.to_path_buf(),
        source,
    };

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let data = serde_json::to_string_pretty(doc).map_err(|e| to_err(e.into()))?;
    fs::write(&temp, data).map_err(to_err)?;
    fs::rename(&temp, path).map_err(to_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn table() -> ChannelTable {
        ChannelTable::five_currency()
    }

    #[test]
    fn test_load_missing_file_is_zeroed() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json"), &table());
        assert_eq!(store.snapshot(), &PersistedState::zeroed(&table()));
        assert_eq!(store.snapshot().main('A'), "0000");
        assert_eq!(store.snapshot().slots("E"), EMPTY_SLOTS);
        assert_eq!(store.snapshot().slots("G"), EMPTY_SLOTS);
    }

    #[test]
    fn test_load_garbage_file_is_zeroed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = StateStore::load(&path, &table());
        assert_eq!(store.snapshot(), &PersistedState::zeroed(&table()));

        fs::write(&path, "[1, 2, 3]").unwrap();
        let store = StateStore::load(&path, &table());
        assert_eq!(store.snapshot(), &PersistedState::zeroed(&table()));
    }

    #[test]
    fn test_malformed_fields_default_individually() {
        let doc = json!({
            "main_modules": {"A": "12a4", "B": "4321", "C": 1234, "D": "123"},
            "e_module": ["1", "2", "3"],
            "g_module": ["0", "0", "0", "7"],
            "last_updated": 17
        });
        let state = PersistedState::from_document(&doc, &table());

        assert_eq!(state.main('A'), "0000");
        assert_eq!(state.main('B'), "4321");
        assert_eq!(state.main('C'), "0000");
        assert_eq!(state.main('D'), "0000");
        assert_eq!(state.main('F'), "0000");
        assert_eq!(state.slots("E"), EMPTY_SLOTS);
        assert_eq!(state.slots("G"), ['0', '0', '0', '7']);
        assert_eq!(state.last_updated, None);
    }

    #[test]
    fn test_missing_module_key_defaults() {
        let doc = json!({
            "main_modules": {"A": "1111"},
            "e_module": ["0", "0", "0", "5"]
        });
        let state = PersistedState::from_document(&doc, &table());
        assert_eq!(state.slots("E"), ['0', '0', '0', '5']);
        assert_eq!(state.slots("G"), EMPTY_SLOTS);
        assert_eq!(state.main('A'), "1111");
    }

    #[test]
    fn test_slot_elements_repaired_one_by_one() {
        let doc = json!({
            "e_module": ["47", "x", 3, null],
        });
        let state = PersistedState::from_document(&doc, &table());
        assert_eq!(state.slots("E"), ['4', '0', '3', '0']);
    }

    #[test]
    fn test_legacy_overflow_layout() {
        let table = ChannelTable::thirty_rate();
        let doc = json!({
            "main_modules": {"A": "1234", "a": "5678"},
            "overflow_modules": {"ZZ": ["0", "0", "0", "5"], "TT": ["0", "9", "0", "0"]},
            "last_updated": "2025-01-01T10:00:00.123456"
        });
        let state = PersistedState::from_document(&doc, &table);
        assert_eq!(state.main('A'), "1234");
        assert_eq!(state.main('a'), "5678");
        assert_eq!(state.slots("ZZ"), ['0', '0', '0', '5']);
        assert_eq!(state.slots("TT"), ['0', '9', '0', '0']);
        assert_eq!(state.last_updated.as_deref(), Some("2025-01-01T10:00:00.123456"));

        // a is TT slot 1
        assert_eq!(state.full_value(table.get('a').unwrap()), "56789");
    }

    #[test]
    fn test_legacy_document_migrated_on_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let table = ChannelTable::thirty_rate();
        fs::write(
            &path,
            json!({
                "main_modules": {"A": "1234"},
                "overflow_modules": {"ZZ": ["0", "0", "0", "5"]}
            })
            .to_string(),
        )
        .unwrap();

        let mut store = StateStore::load(&path, &table);
        assert_eq!(store.get_full_value(table.get('A').unwrap()), "12345");
        store.save().unwrap();

        let saved: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(saved.get("overflow_modules").is_none());
        assert_eq!(saved["zz_module"], json!(["0", "0", "0", "5"]));
        let reloaded = StateStore::load(&path, &table);
        assert_eq!(reloaded.snapshot().slots("ZZ"), ['0', '0', '0', '5']);
    }

    #[test]
    fn test_flat_key_wins_over_legacy() {
        let doc = json!({
            "e_module": ["1", "1", "1", "1"],
            "overflow_modules": {"E": ["2", "2", "2", "2"]}
        });
        let state = PersistedState::from_document(&doc, &table());
        assert_eq!(state.slots("E"), ['1', '1', '1', '1']);
    }

    #[test]
    fn test_full_value_drops_zero_overflow() {
        let table = table();
        let mut state = PersistedState::zeroed(&table);
        state.main_modules.insert('A', "1234".to_string());
        state.overflow_modules.insert("E".to_string(), ['0', '0', '0', '5']);

        assert_eq!(state.full_value(table.get('A').unwrap()), "12345");
        // B shares module E but its slot is '0'
        state.main_modules.insert('B', "0012".to_string());
        assert_eq!(state.full_value(table.get('B').unwrap()), "0012");
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let table = table();

        let mut store = StateStore::load(&path, &table);
        let usd = table.get('A').unwrap().clone();
        store.commit(&usd, "1234", "E", ['0', '0', '0', '5']).unwrap();

        let reloaded = StateStore::load(&path, &table);
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert!(reloaded.snapshot().last_updated.is_some());
        assert_eq!(reloaded.get_full_value(&usd), "12345");
    }

    #[test]
    fn test_saved_document_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::load(&path, &table());
        store.save().unwrap();

        let doc: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["main_modules"]["F"], json!("0000"));
        assert_eq!(doc["e_module"], json!(["0", "0", "0", "0"]));
        assert_eq!(doc["g_module"], json!(["0", "0", "0", "0"]));
        assert!(doc["last_updated"].is_string());
    }

    #[test]
    fn test_save_failure_keeps_memory_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("state.json");
        let table = table();
        let mut store = StateStore::load(&path, &table);

        let usd = table.get('A').unwrap().clone();
        let err = store.commit(&usd, "4321", "E", ['0', '0', '0', '1']).unwrap_err();
        assert_eq!(err.path, path);
        assert_eq!(store.get_full_value(&usd), "43211");
    }

    #[test]
    fn test_unknown_channels_are_dropped() {
        let doc = json!({"main_modules": {"Q": "9999"}, "q_module": ["1", "1", "1", "1"]});
        let state = PersistedState::from_document(&doc, &table());
        assert!(!state.main_modules.contains_key(&'Q'));
        assert!(!state.overflow_modules.contains_key("Q"));
    }
}
