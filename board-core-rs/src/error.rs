//! Error types for the rate board controller

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::ChannelCode;

/// Input rejected before any I/O takes place
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("rate must be 3, 4 or 5 digits, got {0} characters")]
    InvalidLength(usize),
    #[error("rate must contain only digits: {0:?}")]
    NonDigitInput(String),
    #[error("unknown channel code {0:?}")]
    UnknownChannel(ChannelCode),
    #[error("malformed entry {0:?}, expected <code><3-5 digits>")]
    MalformedEntry(String),
}

/// Failures on the device link
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not connected to device")]
    NotConnected,
    #[error("could not connect to {endpoint} after {attempts} attempt(s): {source}")]
    ConnectFailed {
        endpoint: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("device closed the connection")]
    Closed,
    #[error("device rejected command (NACK)")]
    Nack,
    #[error("unexpected reply from device: {0:?}")]
    UnexpectedReply(String),
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),
}

impl LinkError {
    /// Whether the underlying connection should be considered dead
    pub fn is_connection_lost(&self) -> bool {
        match self {
            // A late reply would be read as the answer to the next command
            LinkError::NotConnected | LinkError::Closed | LinkError::AckTimeout(_) => true,
            LinkError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// State or submission log could not be written
#[derive(Debug, Error)]
#[error("could not write {path}: {source}")]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Outcome of the resend attempts after a partial failure
#[derive(Debug)]
pub struct RollbackReport {
    /// Resend of the previous main digits
    pub main: Result<(), LinkError>,
    /// Resend of the previous full module content
    pub module: Result<(), LinkError>,
}

impl RollbackReport {
    /// Both resends were written to the link
    pub fn is_complete(&self) -> bool {
        self.main.is_ok() && self.module.is_ok()
    }
}

/// Why a single rate update did not commit
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// Link could not be opened; nothing was sent
    #[error("connection failed: {0}")]
    Connection(#[source] LinkError),

    /// Main command never reached the device; nothing changed
    #[error("main command for {channel:?} failed: {source}")]
    MainSendFailed {
        channel: ChannelCode,
        #[source]
        source: LinkError,
    },

    /// Main command was sent, overflow command failed, rollback was attempted
    #[error("overflow command for module {module_id} failed after main {channel:?} was sent: {source}")]
    OverflowSendFailed {
        channel: ChannelCode,
        module_id: String,
        #[source]
        source: LinkError,
        rollback: RollbackReport,
    },
}

impl UpdateError {
    /// True when the main command already went out before the failure
    pub fn main_was_sent(&self) -> bool {
        matches!(self, UpdateError::OverflowSendFailed { .. })
    }

    /// Rollback outcome, if a rollback was attempted
    pub fn rollback(&self) -> Option<&RollbackReport> {
        match self {
            UpdateError::OverflowSendFailed { rollback, .. } => Some(rollback),
            _ => None,
        }
    }
}

/// Invalid channel tables and unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("channel table is empty")]
    EmptyTable,
    #[error("duplicate channel code {0:?}")]
    DuplicateChannel(ChannelCode),
    #[error("slot {slot} of module {module_id} assigned to both {first:?} and {second:?}")]
    DuplicateSlot {
        module_id: String,
        slot: u8,
        first: ChannelCode,
        second: ChannelCode,
    },
    #[error("slot index {0} out of range (0-3)")]
    SlotOutOfRange(u8),
    #[error("invalid channel code {0:?}")]
    InvalidChannelCode(ChannelCode),
    #[error("invalid module id {0:?}")]
    InvalidModuleId(String),
    #[error("module id {0:?} collides with another identifier")]
    IdentifierCollision(String),
    #[error("unknown channel preset {0:?}")]
    UnknownPreset(String),
    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced by the controller facade and its worker
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("unknown channel code {0:?}")]
    UnknownChannel(ChannelCode),
    #[error("controller worker has stopped")]
    WorkerStopped,
}
