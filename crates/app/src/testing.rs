//! Test doubles shared by the unit tests of this crate.

use std::collections::VecDeque;

use chrono::{TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use evohub_domain::command::{Command, SendOptions};
use evohub_domain::error::EvohubError;
use evohub_domain::id::{CommandId, DeviceId};
use evohub_domain::message::{Code, Message, Verb};
use evohub_domain::payload::Payload;
use evohub_domain::time::Timestamp;

use crate::ports::{CommandHandle, CommandSink};

/// Records every command. Requests are answered from a list of canned
/// replies; unanswered requests stay pending forever.
#[derive(Default)]
pub(crate) struct SpySink {
    sent: Mutex<Vec<(Command, SendOptions)>>,
    replies: Mutex<VecDeque<Message>>,
    pending: Mutex<Vec<oneshot::Sender<Message>>>,
    failing: bool,
}

impl SpySink {
    pub(crate) fn with_replies(replies: Vec<Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub(crate) fn commands(&self) -> Vec<Command> {
        self.sent.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    pub(crate) fn options(&self) -> Vec<SendOptions> {
        self.sent.lock().iter().map(|(_, o)| *o).collect()
    }

    pub(crate) fn codes(&self) -> Vec<Code> {
        self.sent.lock().iter().map(|(c, _)| c.code()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[derive(Debug, thiserror::Error)]
#[error("sink refused command")]
struct Refused;

impl CommandSink for SpySink {
    fn send(&self, command: Command, options: SendOptions) -> Result<CommandHandle, EvohubError> {
        if self.failing {
            return Err(EvohubError::Send(Box::new(Refused)));
        }
        let id: CommandId = command.id();
        self.sent.lock().push((command.clone(), options));
        if !command.expects_reply() {
            return Ok(CommandHandle::detached(id));
        }

        let (tx, rx) = oneshot::channel();
        let mut replies = self.replies.lock();
        match replies.iter().position(|m| command.is_answered_by(m)) {
            Some(pos) => {
                if let Some(reply) = replies.remove(pos) {
                    let _ = tx.send(reply);
                }
            }
            None => self.pending.lock().push(tx),
        }
        Ok(CommandHandle::pending(id, rx))
    }
}

pub(crate) fn id(s: &str) -> DeviceId {
    s.parse().unwrap()
}

/// A fixed origin so tests read in relative seconds.
pub(crate) fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub(crate) fn at(secs: i64) -> Timestamp {
    t0() + TimeDelta::seconds(secs)
}

pub(crate) fn msg(
    code: Code,
    verb: Verb,
    src: &str,
    dst: Option<&str>,
    payload: Payload,
    timestamp: Timestamp,
) -> Message {
    let mut builder = Message::builder()
        .code(code)
        .verb(verb)
        .src(id(src))
        .payload(payload)
        .timestamp(timestamp);
    if let Some(dst) = dst {
        builder = builder.dst(id(dst));
    }
    builder.build().unwrap()
}
