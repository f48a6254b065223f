pub mod commands;
pub mod events;
pub mod types;

pub use commands::{HubCommand, NetworkCommand};
pub use events::{HubEvent, HubEventKind};
pub use types::{
    ChatMessage, Delivery, DisappearTimer, Notification, NotificationLevel, TypingOptions,
    UserRoom,
};
