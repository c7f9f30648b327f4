//! Controller fault log (`0418`).

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value, json};

use evohub_domain::command::{Command, Priority, SendOptions};
use evohub_domain::error::{EvohubError, ExpiredCallbackError};
use evohub_domain::id::DeviceId;
use evohub_domain::message::{Code, Message, Verb};
use evohub_domain::payload::{Fault, Payload};
use evohub_domain::time::Timestamp;

use super::{Capability, CapabilityKind, Context};
use crate::discovery::Planned;
use crate::ports::CommandSink;

/// Number of slots in a controller's fault log.
pub const FAULT_LOG_SIZE: u8 = 64;

/// Faults keyed by log index, newest first.
pub type FaultLogEntries = BTreeMap<u8, Fault>;

#[derive(Debug, Default)]
pub struct FaultLog {
    last_fault: Option<Fault>,
    entries: FaultLogEntries,
    fetched_at: Option<Timestamp>,
}

impl FaultLog {
    /// The most recent fault heard on the air.
    #[must_use]
    pub fn last_fault(&self) -> Option<&Fault> {
        self.last_fault.as_ref()
    }

    /// The result of the last successful fetch.
    #[must_use]
    pub fn entries(&self) -> &FaultLogEntries {
        &self.entries
    }

    /// Return the stored log, fetching it first if empty or `force_refresh`.
    ///
    /// The whole fetch runs under one deadline. The stored log is replaced
    /// only when the fetch completes.
    ///
    /// # Errors
    ///
    /// Returns [`EvohubError::ExpiredCallback`] if the log is not complete
    /// before `deadline`, or a send error from the sink.
    pub async fn get_fault_log<S: CommandSink + ?Sized>(
        &mut self,
        sink: &S,
        controller: DeviceId,
        force_refresh: bool,
        deadline: Duration,
    ) -> Result<FaultLogEntries, EvohubError> {
        if !force_refresh && !self.entries.is_empty() {
            return Ok(self.entries.clone());
        }
        let entries = fetch(sink, controller, deadline).await?;
        tracing::debug!(%controller, entries = entries.len(), "fetched fault log");
        self.entries = entries;
        self.fetched_at = Some(evohub_domain::time::now());
        Ok(self.entries.clone())
    }
}

async fn fetch<S: CommandSink + ?Sized>(
    sink: &S,
    controller: DeviceId,
    deadline: Duration,
) -> Result<FaultLogEntries, EvohubError> {
    let expired = || ExpiredCallbackError {
        operation: "get_fault_log",
        deadline,
    };
    let requests = async {
        let mut entries = FaultLogEntries::new();
        for log_idx in 0..FAULT_LOG_SIZE {
            let handle = sink.send(
                Command::get_fault_log_entry(controller, log_idx),
                SendOptions::default().with_priority(Priority::High),
            )?;
            let reply = handle.reply().await.ok_or_else(expired)?;
            match reply.payload() {
                Payload::FaultLogEntry(entry) => match &entry.fault {
                    Some(fault) => {
                        entries.insert(log_idx, fault.clone());
                    }
                    None => break,
                },
                _ => break,
            }
        }
        Ok::<_, EvohubError>(entries)
    };
    tokio::time::timeout(deadline, requests)
        .await
        .map_err(|_| expired())?
}

impl Capability for FaultLog {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::FaultLog
    }

    fn codes(&self) -> &'static [Code] {
        &[Code::FAULT_LOG]
    }

    fn handle_message(
        &mut self,
        ctx: &Context<'_>,
        msg: &Message,
        _prev: Option<&Message>,
    ) -> Result<(), EvohubError> {
        if msg.src() != ctx.controller {
            return Ok(());
        }
        let Payload::FaultLogEntry(entry) = msg.payload() else {
            return Ok(());
        };
        // slot 00 of the log is the latest fault
        let is_latest = msg.verb() == Verb::Information || entry.log_idx == 0;
        if is_latest && entry.fault.is_some() {
            self.last_fault.clone_from(&entry.fault);
        }
        Ok(())
    }

    fn discovery(&self, controller: DeviceId) -> Vec<Planned> {
        vec![Planned::status(Command::get_fault_log_entry(controller, 0))]
    }

    fn status(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        let entries: Map<String, Value> = self
            .entries
            .iter()
            .map(|(idx, fault)| (format!("{idx:02X}"), json!(fault)))
            .collect();
        out.insert("last_fault".into(), json!(self.last_fault));
        out.insert("fault_log".into(), Value::Object(entries));
        out.insert("fault_log_fetched".into(), json!(self.fetched_at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SpySink, at, id, msg};
    use chrono::NaiveDate;
    use evohub_domain::payload::FaultLogEntry;

    const CTL: &str = "01:145038";

    fn fault(device: &str) -> Fault {
        Fault {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            fault_state: "fault".into(),
            fault_type: "battery_low".into(),
            domain_idx: "00".into(),
            device_class: "sensor".into(),
            device_id: Some(id(device)),
        }
    }

    fn entry(log_idx: u8, fault: Option<Fault>) -> Message {
        msg(
            Code::FAULT_LOG,
            Verb::Response,
            CTL,
            None,
            Payload::FaultLogEntry(FaultLogEntry { log_idx, fault }),
            at(0),
        )
    }

    #[tokio::test]
    async fn should_fetch_entries_until_empty_slot() {
        let sink = SpySink::with_replies(vec![
            entry(0, Some(fault("04:056057"))),
            entry(1, Some(fault("04:056061"))),
            entry(2, None),
        ]);
        let mut log = FaultLog::default();

        let entries = log
            .get_fault_log(&sink, id(CTL), true, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(sink.len(), 3);
        assert_eq!(log.entries(), &entries);
    }

    #[tokio::test]
    async fn should_return_cached_log_unless_forced() {
        let sink = SpySink::with_replies(vec![entry(0, Some(fault("04:056057"))), entry(1, None)]);
        let mut log = FaultLog::default();
        log.get_fault_log(&sink, id(CTL), false, Duration::from_secs(2))
            .await
            .unwrap();
        sink.clear();

        let entries = log
            .get_fault_log(&sink, id(CTL), false, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_expire_and_keep_stored_log_when_no_reply() {
        let sink = SpySink::with_replies(vec![entry(0, Some(fault("04:056057"))), entry(1, None)]);
        let mut log = FaultLog::default();
        log.get_fault_log(&sink, id(CTL), false, Duration::from_secs(2))
            .await
            .unwrap();
        let before = log.entries().clone();

        let err = log
            .get_fault_log(&sink, id(CTL), true, Duration::from_secs(2))
            .await
            .unwrap_err();

        assert!(matches!(err, EvohubError::ExpiredCallback(_)));
        assert_eq!(log.entries(), &before);
    }

    #[tokio::test]
    async fn should_propagate_send_failure() {
        let sink = SpySink::failing();
        let err = FaultLog::default()
            .get_fault_log(&sink, id(CTL), true, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, EvohubError::Send(_)));
    }

    #[test]
    fn should_record_last_fault_from_controller() {
        let pool = crate::devices::DevicePool::new();
        let config = crate::config::EngineConfig::default();
        let ctx = Context {
            controller: id(CTL),
            pool: &pool,
            config: &config,
        };
        let mut log = FaultLog::default();
        let info = msg(
            Code::FAULT_LOG,
            Verb::Information,
            CTL,
            None,
            Payload::FaultLogEntry(FaultLogEntry {
                log_idx: 0,
                fault: Some(fault("04:056057")),
            }),
            at(0),
        );

        log.handle_message(&ctx, &info, None).unwrap();

        assert_eq!(
            log.last_fault().and_then(|f| f.device_id),
            Some(id("04:056057"))
        );
        assert!(log.entries().is_empty());
    }
}
