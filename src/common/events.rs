use super::types::ChatMessage;

/// Events the hub pushes to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    ReceiveMessage(ChatMessage),
    ConnectedUser(Vec<String>),
    NewUser(String),
    TypingTrue(String),
    TypingFalse,
    OnConnected(String),
    Ping,
}

/// Event names usable as subscription keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubEventKind {
    ReceiveMessage,
    ConnectedUser,
    NewUser,
    TypingTrue,
    TypingFalse,
    OnConnected,
    Ping,
}

impl HubEvent {
    pub fn kind(&self) -> HubEventKind {
        match self {
            HubEvent::ReceiveMessage(_) => HubEventKind::ReceiveMessage,
            HubEvent::ConnectedUser(_) => HubEventKind::ConnectedUser,
            HubEvent::NewUser(_) => HubEventKind::NewUser,
            HubEvent::TypingTrue(_) => HubEventKind::TypingTrue,
            HubEvent::TypingFalse => HubEventKind::TypingFalse,
            HubEvent::OnConnected(_) => HubEventKind::OnConnected,
            HubEvent::Ping => HubEventKind::Ping,
        }
    }
}
