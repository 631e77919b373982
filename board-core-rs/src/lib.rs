//! Board Core Library
//!
//! Controller for LED forex rate boards. Each rate channel drives a 4-digit
//! main module; 5-digit rates put their last digit into a slot of a shared
//! 4-slot overflow module. Updates touch both modules and are committed
//! atomically, with rollback when the second write fails.

pub mod config;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod link;
pub mod overflow;
pub mod state;
pub mod submissions;
pub mod table;
pub mod transaction;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ControllerConfig, DeviceConfig, StorageConfig};
pub use controller::{RateController, ResetReport, ResetStatus};
pub use encoder::{encode, EncodedRate};
pub use error::{
    ConfigError, ControllerError, LinkError, PersistenceError, RollbackReport, UpdateError,
    ValidationError,
};
pub use link::{CommandSink, DeviceLink};
pub use overflow::{OverflowRegistry, SlotContent};
pub use state::{PersistedState, StateStore};
pub use submissions::{EntryResult, SubmissionLog, SubmissionRecord};
pub use table::ChannelTable;
pub use transaction::{RateUpdate, RateUpdateTransaction};
pub use types::*;
pub use worker::ControllerHandle;
