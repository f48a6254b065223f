use std::collections::VecDeque;

use hubchat::common::Notification;

const MAX_NOTIFICATIONS: usize = 50;

/// Local UI state that the session does not own.
#[derive(Default)]
pub struct AppState {
    pub notifications: VecDeque<Notification>,
    pub leaving: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the newest notifications, dropping the oldest past the limit.
    pub fn push_notification(&mut self, notification: Notification) {
        if self.notifications.len() == MAX_NOTIFICATIONS {
            self.notifications.pop_front();
        }
        self.notifications.push_back(notification);
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }
}
