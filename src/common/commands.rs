use tokio::sync::oneshot;

use super::types::{ChatMessage, UserRoom};
use crate::error::ChatError;

/// Hub methods the client invokes.
#[derive(Debug, Clone, PartialEq)]
pub enum HubCommand {
    JoinRoom(UserRoom),
    SendMessage(ChatMessage),
    SetTypingTrue(UserRoom),
    SetTypingFalse(UserRoom),
    /// Leave the room and stop the connection.
    LeaveChat,
}

impl HubCommand {
    pub fn name(&self) -> &'static str {
        match self {
            HubCommand::JoinRoom(_) => "JoinRoom",
            HubCommand::SendMessage(_) => "SendMessage",
            HubCommand::SetTypingTrue(_) => "SetTypingTrue",
            HubCommand::SetTypingFalse(_) => "SetTypingFalse",
            HubCommand::LeaveChat => "LeaveChat",
        }
    }
}

/// A command on its way to the network task, with the channel its result
/// is reported on.
#[derive(Debug)]
pub struct NetworkCommand {
    pub command: HubCommand,
    pub reply: oneshot::Sender<Result<(), ChatError>>,
}
