//! Caller-facing facade over link, state and submission history.
//!
//! A [`RateController`] owns exactly one command sink, so every operation on
//! it is serialized by `&mut self`. Share it between tasks through
//! [`crate::worker::ControllerHandle`].

use std::fmt::Write as _;

use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, LinkError, UpdateError, ValidationError};
use crate::link::{CommandSink, DeviceLink};
use crate::overflow::{join_slots, EMPTY_SLOTS};
use crate::state::{PersistedState, StateStore};
use crate::submissions::{EntryResult, SubmissionLog, SubmissionRecord};
use crate::table::ChannelTable;
use crate::transaction::{RateUpdate, RateUpdateTransaction};
use crate::types::{timestamp_now, ChannelCode, Command, SlotIndex, SLOTS_PER_MODULE, ZERO_MAIN};

/// Shortest and longest batch entry: code plus 3 to 5 digits
const MIN_ENTRY_LEN: usize = 4;
const MAX_ENTRY_LEN: usize = 6;

/// Overall result of a reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStatus {
    Complete,
    Partial,
    Failed,
}

/// Per-target outcome of [`RateController::reset_all`]
#[derive(Debug, Default)]
pub struct ResetReport {
    /// Targets that received their zero command, in send order
    pub reset: Vec<String>,
    pub failed: Vec<(String, LinkError)>,
    /// Whether the resulting state reached disk
    pub persisted: bool,
}

impl ResetReport {
    pub fn status(&self) -> ResetStatus {
        match (self.reset.is_empty(), self.failed.is_empty()) {
            (_, true) => ResetStatus::Complete,
            (true, false) => ResetStatus::Failed,
            (false, false) => ResetStatus::Partial,
        }
    }
}

/// Rate board controller
pub struct RateController<S: CommandSink = DeviceLink> {
    config: ControllerConfig,
    sink: S,
    store: StateStore,
    submissions: SubmissionLog,
}

impl RateController<DeviceLink> {
    /// Controller talking to the configured TCP endpoint. Does not connect yet.
    pub fn open(config: ControllerConfig) -> Self {
        let link = DeviceLink::new(config.device.clone());
        Self::with_sink(config, link)
    }
}

impl<S: CommandSink> RateController<S> {
    pub fn with_sink(config: ControllerConfig, sink: S) -> Self {
        let store = StateStore::load(&config.storage.state_file, &config.channels);
        let submissions = SubmissionLog::open(
            &config.storage.submissions_file,
            config.storage.history_limit,
        );
        info!(
            "Controller: {} channel(s) across {} overflow module(s)",
            config.channels.len(),
            config.channels.module_ids().count()
        );
        Self {
            config,
            sink,
            store,
            submissions,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.config.channels
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Open the link now instead of on first use
    pub async fn connect(&mut self) -> Result<(), ControllerError> {
        self.sink.ensure_connected().await?;
        Ok(())
    }

    /// Release the link. The next operation reconnects.
    pub async fn shutdown(&mut self) {
        self.sink.close().await;
        info!("Controller: Shut down");
    }

    /// Set one channel to a 3-5 digit rate.
    ///
    /// Input is validated before the link is touched.
    pub async fn set_rate(
        &mut self,
        code: ChannelCode,
        rate: &str,
    ) -> Result<RateUpdate, UpdateError> {
        let channel = self
            .config
            .channels
            .get(code)
            .ok_or(ValidationError::UnknownChannel(code))?;
        let transaction = RateUpdateTransaction::prepare(channel, rate)?;

        self.sink
            .ensure_connected()
            .await
            .map_err(UpdateError::Connection)?;
        transaction.execute(&mut self.sink, &mut self.store).await
    }

    /// Last committed value, `None` for unknown codes
    pub fn get_full_value(&self, code: ChannelCode) -> Option<String> {
        let channel = self.config.channels.get(code)?;
        Some(self.store.get_full_value(channel))
    }

    pub fn get_state_snapshot(&self) -> PersistedState {
        self.store.snapshot().clone()
    }

    /// Zero every main module (table order) then every overflow module (sorted).
    ///
    /// Each target that accepted its zero command is zeroed in the state; the
    /// state is saved once at the end.
    pub async fn reset_all(&mut self) -> Result<ResetReport, ControllerError> {
        self.sink.ensure_connected().await?;

        // (command, channel code for main modules)
        let table = &self.config.channels;
        let commands = table
            .channels()
            .iter()
            .map(|c| (Command::main(c.code, ZERO_MAIN), Some(c.code)))
            .chain(table.module_ids().map(|m| (Command::module(m, &EMPTY_SLOTS), None)))
            .collect::<Vec<_>>();

        let mut report = ResetReport::default();
        for (command, code) in commands {
            let target = command.target().to_string();
            match self.sink.send(&command).await {
                Ok(()) => {
                    match code {
                        Some(code) => self.store.reset_main(code),
                        None => self.store.reset_module(&target),
                    }
                    report.reset.push(target);
                }
                Err(e) => {
                    warn!("Controller: Reset of {} failed: {}", target, e);
                    report.failed.push((target, e));
                }
            }
        }

        if !report.reset.is_empty() {
            report.persisted = self.store.save().is_ok();
        }
        info!(
            "Controller: Reset {:?}, {} ok, {} failed",
            report.status(),
            report.reset.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Apply a comma separated batch like `"A12345, B123"` and record it.
    ///
    /// Entries run in order; a failing entry does not stop the rest.
    pub async fn submit(&mut self, raw_input: &str) -> SubmissionRecord {
        let entries = split_entries(raw_input);
        let mut results = Vec::with_capacity(entries.len());

        for entry in &entries {
            let result = match parse_entry(entry) {
                Ok((code, rate)) => {
                    let name = self
                        .config
                        .channels
                        .get(code)
                        .map(|c| c.display_name.clone());
                    match self.set_rate(code, rate).await {
                        Ok(update) => EntryResult::ok(
                            entry.as_str(),
                            name.unwrap_or_else(|| update.channel.to_string()),
                        ),
                        Err(e) => EntryResult::failed(entry.as_str(), name, e),
                    }
                }
                Err(e) => EntryResult::failed(entry.as_str(), None, e),
            };
            debug!("Controller: Entry {} -> {:?}", entry, result.error);
            results.push(result);
        }

        let record = SubmissionRecord::new(timestamp_now(), raw_input, entries, results);
        if record.total_count > 0 {
            // write failures are logged by the log itself
            let _ = self.submissions.append(record.clone());
        }
        record
    }

    /// Recent submissions, oldest first
    pub fn submissions(&self) -> &[SubmissionRecord] {
        self.submissions.records()
    }

    /// Human readable dump of the committed state
    pub fn status_lines(&self) -> Vec<String> {
        let table = &self.config.channels;
        let state = self.store.snapshot();
        let mut lines = Vec::new();

        lines.push("Main modules:".to_string());
        for channel in table.channels() {
            lines.push(format!(
                "  {} {:<12} {}",
                channel.code,
                channel.display_name,
                state.main(channel.code)
            ));
        }

        lines.push("Overflow modules:".to_string());
        for module_id in table.module_ids() {
            let mut line = format!("  {:<4} {}", module_id, join_slots(&state.slots(module_id)));
            for slot in (0..SLOTS_PER_MODULE as u8).filter_map(SlotIndex::new) {
                let owner = table
                    .registry()
                    .owner(module_id, slot)
                    .map_or_else(|| "unused".to_string(), |c| c.to_string());
                let _ = write!(line, "  [{}]={}", slot, owner);
            }
            lines.push(line);
        }

        lines.push("Full values:".to_string());
        for channel in table.channels() {
            lines.push(format!(
                "  {:<12} ({}) {}",
                channel.display_name,
                channel.code,
                state.full_value(channel)
            ));
        }

        lines.push(format!(
            "Last updated: {}",
            state.last_updated.as_deref().unwrap_or("never")
        ));
        lines
    }

    /// Give back the sink, e.g. to inspect it
    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Comma separated, trimmed, empties dropped
pub fn split_entries(raw_input: &str) -> Vec<String> {
    raw_input
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

/// `A12345` -> `('A', "12345")`; only the shape is checked here
pub fn parse_entry(entry: &str) -> Result<(ChannelCode, &str), ValidationError> {
    let len = entry.chars().count();
    if !(MIN_ENTRY_LEN..=MAX_ENTRY_LEN).contains(&len) {
        return Err(ValidationError::MalformedEntry(entry.to_string()));
    }
    let mut chars = entry.chars();
    match chars.next() {
        Some(code) => Ok((code, chars.as_str())),
        None => Err(ValidationError::MalformedEntry(entry.to_string())),
    }
}
