//! Atomic rate update with best-effort rollback.
//!
//! A rate lands on the board as two commands: the channel's main module and
//! the shared overflow module carrying its fifth digit. The state store only
//! ever sees both or neither:
//!
//! 1. encode the rate (no I/O on failure)
//! 2. snapshot the previous main digits and the full previous module content
//! 3. pack the new overflow digit into the current module content
//! 4. send main; on failure stop, nothing changed
//! 5. send overflow module
//! 6. both sent: commit
//! 7. overflow failed: resend the previous main and module content, leave
//!    the store untouched, report failure
//!
//! The board cannot be read back, so a rollback only re-informs it. If a
//! rollback send fails too, the board may show values the store does not
//! hold; that is logged and reported, never guessed at.

use tracing::{debug, error, info, warn};

use crate::encoder::{encode, EncodedRate};
use crate::error::{RollbackReport, UpdateError, ValidationError};
use crate::link::CommandSink;
use crate::overflow::{update_slot, SlotContent};
use crate::state::StateStore;
use crate::types::{Channel, ChannelCode, Command, ModuleId};

/// A committed rate update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateUpdate {
    pub channel: ChannelCode,
    pub main_digits: String,
    pub module_id: ModuleId,
    pub module_slots: SlotContent,
    pub full_value: String,
    /// False when the state file could not be written (memory is still updated)
    pub persisted: bool,
}

/// One validated update, ready to run against a sink
#[derive(Debug)]
pub struct RateUpdateTransaction<'a> {
    channel: &'a Channel,
    encoded: EncodedRate,
}

impl<'a> RateUpdateTransaction<'a> {
    /// Validate and encode; no I/O
    pub fn prepare(channel: &'a Channel, rate: &str) -> Result<Self, ValidationError> {
        let encoded = encode(rate)?;
        Ok(Self { channel, encoded })
    }

    pub fn encoded(&self) -> &EncodedRate {
        &self.encoded
    }

    /// Run both sends and commit or roll back.
    ///
    /// Always runs to completion once the main command has gone out.
    pub async fn execute<S: CommandSink>(
        self,
        sink: &mut S,
        store: &mut StateStore,
    ) -> Result<RateUpdate, UpdateError> {
        let channel = self.channel;
        let module_id = channel.module_id.as_str();

        let prev_main = store.snapshot().main(channel.code).to_string();
        let prev_slots = store.snapshot().slots(module_id);
        let new_slots = update_slot(&prev_slots, channel.slot_index, self.encoded.overflow_digit);

        debug!(
            "Transaction: {} main={} overflow={} (module {} slot {})",
            channel.code, self.encoded.main_digits, self.encoded.overflow_digit, module_id, channel.slot_index
        );

        let main_cmd = Command::main(channel.code, &self.encoded.main_digits);
        if let Err(source) = sink.send(&main_cmd).await {
            warn!("Transaction: Main command {} failed, nothing changed: {}", main_cmd, source);
            return Err(UpdateError::MainSendFailed {
                channel: channel.code,
                source,
            });
        }

        let module_cmd = Command::module(module_id, &new_slots);
        if let Err(source) = sink.send(&module_cmd).await {
            warn!(
                "Transaction: Overflow command {} failed after {}, rolling back",
                module_cmd, main_cmd
            );
            let rollback = rollback(
                sink,
                Command::main(channel.code, &prev_main),
                Command::module(module_id, &prev_slots),
            )
            .await;
            return Err(UpdateError::OverflowSendFailed {
                channel: channel.code,
                module_id: module_id.to_string(),
                source,
                rollback,
            });
        }

        let persisted = store
            .commit(channel, &self.encoded.main_digits, module_id, new_slots)
            .is_ok();
        let full_value = store.get_full_value(channel);
        info!(
            "Transaction: {} ({}) set to {}",
            channel.display_name, channel.code, full_value
        );

        Ok(RateUpdate {
            channel: channel.code,
            main_digits: self.encoded.main_digits,
            module_id: module_id.to_string(),
            module_slots: new_slots,
            full_value,
            persisted,
        })
    }
}

/// Resend the pre-transaction content; each send has its own retry budget
async fn rollback<S: CommandSink>(
    sink: &mut S,
    main_cmd: Command,
    module_cmd: Command,
) -> RollbackReport {
    let main = sink.send(&main_cmd).await;
    let module = sink.send(&module_cmd).await;

    if let Err(e) = &main {
        error!("Transaction: Rollback {} failed, board may diverge: {}", main_cmd, e);
    }
    if let Err(e) = &module {
        error!("Transaction: Rollback {} failed, board may diverge: {}", module_cmd, e);
    }
    if main.is_ok() && module.is_ok() {
        info!("Transaction: Rolled back to {} {}", main_cmd, module_cmd);
    }

    RollbackReport { main, module }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ChannelTable;
    use crate::testing::ScriptedSink;
    use tempfile::tempdir;

    async fn connected(sink: ScriptedSink) -> ScriptedSink {
        let mut sink = sink;
        sink.ensure_connected().await.unwrap();
        sink
    }

    #[tokio::test]
    async fn test_scenario_five_digit_rate() {
        let dir = tempdir().unwrap();
        let table = ChannelTable::five_currency();
        let mut store = StateStore::load(dir.path().join("state.json"), &table);
        let mut sink = connected(ScriptedSink::new()).await;

        let usd = table.get('A').unwrap();
        let update = RateUpdateTransaction::prepare(usd, "12345")
            .unwrap()
            .execute(&mut sink, &mut store)
            .await
            .unwrap();

        assert_eq!(sink.sent, vec!["A1234", "E0005"]);
        assert_eq!(update.full_value, "12345");
        assert_eq!(update.module_slots, ['0', '0', '0', '5']);
        assert!(update.persisted);
        assert_eq!(store.get_full_value(usd), "12345");
    }

    #[tokio::test]
    async fn test_scenario_three_digit_rate() {
        let dir = tempdir().unwrap();
        let table = ChannelTable::five_currency();
        let mut store = StateStore::load(dir.path().join("state.json"), &table);
        let mut sink = connected(ScriptedSink::new()).await;

        let gbp = table.get('B').unwrap();
        let update = RateUpdateTransaction::prepare(gbp, "123")
            .unwrap()
            .execute(&mut sink, &mut store)
            .await
            .unwrap();

        // B owns slot 2 of E
        assert_eq!(sink.sent, vec!["B0012", "E0030"]);
        assert_eq!(update.main_digits, "0012");
        assert_eq!(store.get_full_value(gbp), "00123");
    }

    #[tokio::test]
    async fn test_neighbour_slots_preserved() {
        let dir = tempdir().unwrap();
        let table = ChannelTable::five_currency();
        let mut store = StateStore::load(dir.path().join("state.json"), &table);
        let mut sink = connected(ScriptedSink::new()).await;

        for (code, rate) in [('A', "12345"), ('D', "98761"), ('C', "55552")] {
            let channel = table.get(code).unwrap();
            RateUpdateTransaction::prepare(channel, rate)
                .unwrap()
                .execute(&mut sink, &mut store)
                .await
                .unwrap();
        }

        assert_eq!(sink.sent.last().map(String::as_str), Some("E1205"));
        assert_eq!(store.get_full_value(table.get('A').unwrap()), "12345");
        assert_eq!(store.get_full_value(table.get('D').unwrap()), "98761");
        assert_eq!(store.get_full_value(table.get('C').unwrap()), "55552");
    }

    #[tokio::test]
    async fn test_scenario_overflow_failure_rolls_back() {
        let dir = tempdir().unwrap();
        let table = ChannelTable::five_currency();
        let mut store = StateStore::load(dir.path().join("state.json"), &table);
        let eur = table.get('C').unwrap();

        let mut sink = connected(ScriptedSink::new()).await;
        RateUpdateTransaction::prepare(eur, "43217")
            .unwrap()
            .execute(&mut sink, &mut store)
            .await
            .unwrap();
        assert_eq!(store.get_full_value(eur), "43217");

        // C owns slot 1 of E
        let mut sink = connected(ScriptedSink::new().fail_command("E0900")).await;
        let err = RateUpdateTransaction::prepare(eur, "88889")
            .unwrap()
            .execute(&mut sink, &mut store)
            .await
            .unwrap_err();

        assert!(err.main_was_sent());
        assert!(err.rollback().unwrap().is_complete());
        assert_eq!(sink.attempted, vec!["C8888", "E0900", "C4321", "E0700"]);
        assert_eq!(store.get_full_value(eur), "43217");

        let reloaded = StateStore::load(store.path(), &table);
        assert_eq!(reloaded.get_full_value(eur), "43217");
    }

    #[tokio::test]
    async fn test_main_failure_aborts_without_rollback() {
        let dir = tempdir().unwrap();
        let table = ChannelTable::five_currency();
        let mut store = StateStore::load(dir.path().join("state.json"), &table);
        let mut sink = connected(ScriptedSink::new().fail_command("A1234")).await;

        let usd = table.get('A').unwrap();
        let err = RateUpdateTransaction::prepare(usd, "12345")
            .unwrap()
            .execute(&mut sink, &mut store)
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::MainSendFailed { channel: 'A', .. }));
        assert!(!err.main_was_sent());
        assert_eq!(sink.attempted, vec!["A1234"]);
        assert_eq!(store.get_full_value(usd), "0000");
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let dir = tempdir().unwrap();
        let table = ChannelTable::five_currency();
        let mut store = StateStore::load(dir.path().join("state.json"), &table);
        // attempts: 0 main, 1 overflow, 2 rollback main, 3 rollback module
        let mut sink = connected(ScriptedSink::new().fail_attempt(1).fail_attempt(2)).await;

        let jpy = table.get('F').unwrap();
        let err = RateUpdateTransaction::prepare(jpy, "15012")
            .unwrap()
            .execute(&mut sink, &mut store)
            .await
            .unwrap_err();

        let rollback = err.rollback().unwrap();
        assert!(rollback.main.is_err());
        assert!(rollback.module.is_ok());
        assert!(!rollback.is_complete());
        assert_eq!(sink.sent, vec!["F1501", "G0000"]);
        assert_eq!(store.get_full_value(jpy), "0000");
    }

    #[test]
    fn test_prepare_rejects_bad_input() {
        let table = ChannelTable::five_currency();
        let usd = table.get('A').unwrap();
        assert!(matches!(
            RateUpdateTransaction::prepare(usd, "12"),
            Err(ValidationError::InvalidLength(2))
        ));
        assert!(matches!(
            RateUpdateTransaction::prepare(usd, "12x4"),
            Err(ValidationError::NonDigitInput(_))
        ));
    }
}
