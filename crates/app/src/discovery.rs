//! Discovery scheduler: emits the requests that fill gaps in a system's state.
//!
//! One scheduler per scoped entity (system, zone, DHW circuit). On start it
//! walks `Uninitialized → SchemaRequested → ParamsRequested → StatusRequested`
//! emitting the planned requests of each phase its flags allow, then settles
//! in `Steady`, where only periodic requests are re-issued, never more often
//! than their period.
//!
//! Emission never waits for replies. A request that is never answered only
//! leaves the related state stale.

use std::collections::HashMap;

use chrono::TimeDelta;

use evohub_domain::command::{Command, CommandKey, SendOptions};
use evohub_domain::discovery::{DiscoveryFlags, DiscoveryPhase};
use evohub_domain::time::Timestamp;

use crate::ports::CommandSink;

const PHASES: [(DiscoveryFlags, DiscoveryPhase); 3] = [
    (DiscoveryFlags::SCHEMA, DiscoveryPhase::SchemaRequested),
    (DiscoveryFlags::PARAMS, DiscoveryPhase::ParamsRequested),
    (DiscoveryFlags::STATUS, DiscoveryPhase::StatusRequested),
];

/// A request the scheduler emits during one phase.
#[derive(Debug, Clone)]
pub struct Planned {
    pub phase: DiscoveryFlags,
    pub command: Command,
    pub options: SendOptions,
}

impl Planned {
    #[must_use]
    pub fn schema(command: Command) -> Self {
        Self::new(DiscoveryFlags::SCHEMA, command)
    }

    #[must_use]
    pub fn params(command: Command) -> Self {
        Self::new(DiscoveryFlags::PARAMS, command)
    }

    #[must_use]
    pub fn status(command: Command) -> Self {
        Self::new(DiscoveryFlags::STATUS, command)
    }

    fn new(phase: DiscoveryFlags, command: Command) -> Self {
        Self {
            phase,
            command,
            options: SendOptions::default(),
        }
    }

    /// Re-issue this request at most once per `period`.
    #[must_use]
    pub fn every(mut self, period: TimeDelta) -> Self {
        self.options = self.options.with_period(period);
        self
    }

    fn is_periodic(&self) -> bool {
        self.options.period.is_some()
    }
}

#[derive(Debug)]
pub struct DiscoveryScheduler {
    scope: String,
    flags: DiscoveryFlags,
    phase: DiscoveryPhase,
    plan: Vec<Planned>,
    last_sent: HashMap<CommandKey, Timestamp>,
}

impl DiscoveryScheduler {
    #[must_use]
    pub fn new(scope: impl Into<String>, flags: DiscoveryFlags, plan: Vec<Planned>) -> Self {
        Self {
            scope: scope.into(),
            flags,
            phase: DiscoveryPhase::Uninitialized,
            plan,
            last_sent: HashMap::new(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    #[must_use]
    pub fn flags(&self) -> DiscoveryFlags {
        self.flags
    }

    /// Emit the creation-time requests. Does nothing once started.
    ///
    /// Returns the number of requests emitted.
    pub fn start<S: CommandSink + ?Sized>(&mut self, now: Timestamp, sink: &S) -> usize {
        if self.phase != DiscoveryPhase::Uninitialized {
            return 0;
        }
        let mut sent = 0;
        for (flag, phase) in PHASES {
            if self.flags.contains(flag) {
                sent += self.emit(flag, now, sink, false);
                self.phase = phase;
            }
        }
        self.phase = DiscoveryPhase::Steady;
        tracing::debug!(scope = %self.scope, sent, "discovery started");
        sent
    }

    /// Re-issue periodic requests whose period has elapsed.
    ///
    /// Starts the scheduler first if it has not been started.
    pub fn tick<S: CommandSink + ?Sized>(&mut self, now: Timestamp, sink: &S) -> usize {
        if self.phase == DiscoveryPhase::Uninitialized {
            return self.start(now, sink);
        }
        let mut sent = 0;
        for (flag, _) in PHASES {
            if self.flags.contains(flag) {
                sent += self.emit(flag, now, sink, true);
            }
        }
        sent
    }

    fn is_due(&self, planned: &Planned, now: Timestamp) -> bool {
        match (self.last_sent.get(&planned.command.key()), planned.options.period) {
            (None, _) => true,
            (Some(last), Some(period)) => now >= *last + period,
            (Some(_), None) => false,
        }
    }

    fn emit<S: CommandSink + ?Sized>(
        &mut self,
        flag: DiscoveryFlags,
        now: Timestamp,
        sink: &S,
        periodic_only: bool,
    ) -> usize {
        let due: Vec<_> = self
            .plan
            .iter()
            .filter(|p| p.phase == flag)
            .filter(|p| !periodic_only || p.is_periodic())
            .filter(|p| self.is_due(p, now))
            .map(|p| (p.command.renewed(), p.options))
            .collect();

        let mut sent = 0;
        for (command, options) in due {
            let key = command.key();
            match sink.send(command, options) {
                Ok(_) => {
                    self.last_sent.insert(key, now);
                    sent += 1;
                }
                Err(err) => {
                    tracing::warn!(scope = %self.scope, error = %err, "discovery request not sent");
                }
            }
        }
        sent
    }
}
