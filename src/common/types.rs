use serde::{Deserialize, Serialize};

/// A chat message as it travels through the hub.
///
/// Field names follow the hub's camelCase JSON shape. Everything that a
/// sender may omit is optional so that a malformed message degrades to
/// "no countdown" instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub message_time: i64,
    #[serde(default)]
    pub disappear_after: Option<u32>,
    #[serde(default)]
    pub remaining_time: Option<u32>,
    #[serde(default)]
    pub remaining_percentage: Option<f64>,
    #[serde(skip)]
    pub delivery: Delivery,
}

/// Local-only delivery state of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Optimistic local copy, the hub has not acknowledged it yet.
    Pending,
    #[default]
    Delivered,
}

impl ChatMessage {
    /// Builds an outgoing message. Author and time are stamped by the hub.
    pub fn outgoing(content: impl Into<String>, timer: DisappearTimer) -> Self {
        let disappear_after = timer.as_secs();
        Self {
            id: generate_message_id(),
            content: content.into(),
            user: String::new(),
            message_time: 0,
            disappear_after,
            remaining_time: disappear_after,
            remaining_percentage: None,
            delivery: Delivery::Pending,
        }
    }

    /// Self-destruct duration, with zero treated as "none".
    pub fn disappear_duration(&self) -> Option<u32> {
        self.disappear_after.filter(|secs| *secs > 0)
    }

    pub fn is_disappearing(&self) -> bool {
        self.disappear_duration().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == Delivery::Pending
    }
}

/// `"{unix_millis}-{suffix}"`, suffix in `0..10000`.
pub fn generate_message_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().as_u128() % 10_000;
    format!("{millis}-{suffix}")
}

/// Percentage of the countdown still left, clamped to `[0, 100]`.
pub fn remaining_percentage(remaining: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (f64::from(remaining) * 100.0 / f64::from(total)).clamp(0.0, 100.0)
}

/// The self-destruct choices offered by the send form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisappearTimer {
    Secs10,
    Secs30,
    Secs60,
    #[default]
    Off,
}

impl DisappearTimer {
    pub const ALL: [DisappearTimer; 4] = [
        DisappearTimer::Secs10,
        DisappearTimer::Secs30,
        DisappearTimer::Secs60,
        DisappearTimer::Off,
    ];

    pub fn as_secs(self) -> Option<u32> {
        match self {
            DisappearTimer::Secs10 => Some(10),
            DisappearTimer::Secs30 => Some(30),
            DisappearTimer::Secs60 => Some(60),
            DisappearTimer::Off => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DisappearTimer::Secs10 => "10s",
            DisappearTimer::Secs30 => "30s",
            DisappearTimer::Secs60 => "60s",
            DisappearTimer::Off => "Off",
        }
    }
}

/// Who the local user is and which room they are in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoom {
    pub user: String,
    pub room: String,
}

/// Typing indicator state shown under the message list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypingOptions {
    pub is_typing: bool,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

/// Toast-style notice for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub text: String,
    pub created_at: i64,
}

impl Notification {
    pub fn new(level: NotificationLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}
