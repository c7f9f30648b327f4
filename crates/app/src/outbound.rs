//! In-process outbound queue backed by a tokio [`mpsc`] channel.

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use evohub_domain::command::{Command, SendOptions};
use evohub_domain::error::EvohubError;
use evohub_domain::message::Message;

use crate::ports::{CommandHandle, CommandSink};

/// A command waiting to be transmitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub command: Command,
    pub options: SendOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

struct Pending {
    command: Command,
    responder: oneshot::Sender<Message>,
}

/// Queues commands for the transport and matches replies to requests.
///
/// The transport drains the receiver returned by [`OutboundQueue::new`] and
/// feeds every inbound message to [`OutboundQueue::resolve`].
pub struct OutboundQueue {
    sender: mpsc::Sender<Outbound>,
    pending: Mutex<Vec<Pending>>,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` untransmitted commands.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                pending: Mutex::new(Vec::new()),
            },
            receiver,
        )
    }

    /// Complete the first pending request answered by `msg`.
    ///
    /// Returns whether a request was completed.
    pub fn resolve(&self, msg: &Message) -> bool {
        let mut pending = self.pending.lock();
        pending.retain(|p| !p.responder.is_closed());
        let Some(pos) = pending.iter().position(|p| p.command.is_answered_by(msg)) else {
            return false;
        };
        let done = pending.remove(pos);
        tracing::trace!(command = %done.command, "resolved pending command");
        done.responder.send(msg.clone()).is_ok()
    }

    /// Number of requests still waiting for a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let mut pending = self.pending.lock();
        pending.retain(|p| !p.responder.is_closed());
        pending.len()
    }
}

impl CommandSink for OutboundQueue {
    fn send(&self, command: Command, options: SendOptions) -> Result<CommandHandle, EvohubError> {
        let id = command.id();
        let reply = if command.expects_reply() {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().push(Pending {
                command: command.clone(),
                responder: tx,
            });
            Some(rx)
        } else {
            None
        };

        self.sender
            .try_send(Outbound { command, options })
            .map_err(|err| {
                let err = match err {
                    mpsc::error::TrySendError::Full(_) => QueueError::Full,
                    mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
                };
                EvohubError::Send(Box::new(err))
            })?;

        Ok(match reply {
            Some(rx) => CommandHandle::pending(id, rx),
            None => CommandHandle::detached(id),
        })
    }
}
