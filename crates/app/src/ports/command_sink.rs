//! Command sink port: where outbound commands are submitted.

use std::sync::Arc;

use tokio::sync::oneshot;

use evohub_domain::command::{Command, SendOptions};
use evohub_domain::error::EvohubError;
use evohub_domain::id::CommandId;
use evohub_domain::message::Message;

/// An in-flight command.
///
/// Holds the receiving half of the reply channel when the command expects
/// one. Dropping the handle abandons the reply; the command is still sent.
#[derive(Debug)]
pub struct CommandHandle {
    id: CommandId,
    reply: Option<oneshot::Receiver<Message>>,
}

impl CommandHandle {
    /// A handle for a command that expects no reply.
    #[must_use]
    pub fn detached(id: CommandId) -> Self {
        Self { id, reply: None }
    }

    /// A handle whose reply arrives on `reply`.
    #[must_use]
    pub fn pending(id: CommandId, reply: oneshot::Receiver<Message>) -> Self {
        Self {
            id,
            reply: Some(reply),
        }
    }

    #[must_use]
    pub fn id(&self) -> CommandId {
        self.id
    }

    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Wait for the reply.
    ///
    /// Returns `None` if no reply is expected or the sink gave up on it.
    pub async fn reply(self) -> Option<Message> {
        self.reply?.await.ok()
    }
}

/// Accepts outbound commands. Submission never blocks.
pub trait CommandSink: Send + Sync {
    /// Submit a command.
    ///
    /// # Errors
    ///
    /// Returns [`EvohubError::Send`] if the sink cannot accept it.
    fn send(&self, command: Command, options: SendOptions) -> Result<CommandHandle, EvohubError>;
}

impl<T: CommandSink + ?Sized> CommandSink for Arc<T> {
    fn send(&self, command: Command, options: SendOptions) -> Result<CommandHandle, EvohubError> {
        (**self).send(command, options)
    }
}
