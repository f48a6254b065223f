pub mod compose;
pub mod controller;
mod countdown;
mod registry;
pub mod subscription;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::common::{
    ChatMessage, DisappearTimer, HubCommand, HubEvent, HubEventKind, Notification,
    NotificationLevel, TypingOptions, UserRoom,
};
use crate::config::AppConfig;
use crate::error::ChatError;
use crate::network::HubTransport;

pub use compose::{Composer, Draft};
pub use controller::{
    CountdownEvent, DisappearingController, MessageList, RevealPolicy, Visibility, VisibleSet,
};
pub use subscription::{Subscription, on};

const NOTIFICATION_CAPACITY: usize = 64;

const HANDLED_EVENTS: [HubEventKind; 7] = [
    HubEventKind::ReceiveMessage,
    HubEventKind::ConnectedUser,
    HubEventKind::NewUser,
    HubEventKind::TypingTrue,
    HubEventKind::TypingFalse,
    HubEventKind::OnConnected,
    HubEventKind::Ping,
];

/// Everything a session needs to know up front.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub identity: UserRoom,
    pub reveal_policy: RevealPolicy,
    pub tick: Duration,
}

impl SessionContext {
    pub fn new(identity: UserRoom) -> Self {
        Self {
            identity,
            reveal_policy: RevealPolicy::default(),
            tick: Duration::from_secs(1),
        }
    }

    pub fn from_config(identity: UserRoom, config: &AppConfig) -> Self {
        Self {
            identity,
            reveal_policy: config.reveal_policy,
            tick: config.tick_period(),
        }
    }
}

/// One user's presence in one room.
///
/// Created joined by [`start`](Self::start), ended by [`leave`](Self::leave).
/// Cloning is cheap and every clone refers to the same session.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    context: SessionContext,
    transport: Arc<dyn HubTransport>,
    controller: DisappearingController,
    connected_users: watch::Sender<Vec<String>>,
    typing: watch::Sender<TypingOptions>,
    notifications: broadcast::Sender<Notification>,
    subscriptions: Mutex<Vec<Subscription>>,
    left: AtomicBool,
}

impl ChatSession {
    /// Registers the event listeners and joins the room.
    pub async fn start(
        transport: Arc<dyn HubTransport>,
        context: SessionContext,
    ) -> Result<Self, ChatError> {
        let session = Self::new(transport, context);
        let join = HubCommand::JoinRoom(session.identity().clone());

        if let Err(err) = session.inner.transport.send(join).await {
            log::warn!("Joining room {} failed: {err}", session.identity().room);
            session.teardown();
            return Err(err);
        }

        log::info!(
            "Joined room {} as {}",
            session.identity().room,
            session.identity().user
        );
        Ok(session)
    }

    fn new(transport: Arc<dyn HubTransport>, context: SessionContext) -> Self {
        let controller = DisappearingController::new(
            context.identity.user.clone(),
            context.reveal_policy,
            context.tick,
        );
        let (connected_users, _) = watch::channel(Vec::new());
        let (typing, _) = watch::channel(TypingOptions::default());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let session = Self {
            inner: Arc::new(SessionInner {
                context,
                transport,
                controller,
                connected_users,
                typing,
                notifications,
                subscriptions: Mutex::new(Vec::new()),
                left: AtomicBool::new(false),
            }),
        };

        let subscriptions = HANDLED_EVENTS
            .iter()
            .map(|kind| {
                let weak: Weak<SessionInner> = Arc::downgrade(&session.inner);
                on(session.inner.transport.as_ref(), *kind, move |event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_event(event);
                    }
                })
            })
            .collect();
        *session.inner.lock_subscriptions() = subscriptions;

        session
    }

    pub fn identity(&self) -> &UserRoom {
        &self.inner.context.identity
    }

    pub fn controller(&self) -> &DisappearingController {
        &self.inner.controller
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Sends a message, keeping an optimistic local copy until the hub
    /// answers. A rejected message is removed again and reported as an
    /// error notification.
    pub async fn send_message(
        &self,
        content: &str,
        timer: DisappearTimer,
    ) -> Result<ChatMessage, ChatError> {
        if self.is_closed() {
            return Err(ChatError::Disconnected);
        }
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let mut message = ChatMessage::outgoing(content, timer);
        message.user = self.identity().user.clone();
        self.inner.controller.insert_pending(message.clone());

        match self
            .inner
            .transport
            .send(HubCommand::SendMessage(message.clone()))
            .await
        {
            Ok(()) => {
                self.inner.controller.confirm(&message.id);
                Ok(message)
            }
            Err(err) => {
                log::warn!("Sending message {} failed: {err}", message.id);
                self.inner.controller.discard(&message.id);
                self.inner.notify(
                    NotificationLevel::Error,
                    format!("Message not sent: {err}"),
                );
                Err(err)
            }
        }
    }

    pub async fn set_typing(&self, is_typing: bool) -> Result<(), ChatError> {
        if self.is_closed() {
            return Err(ChatError::Disconnected);
        }
        let identity = self.identity().clone();
        let command = if is_typing {
            HubCommand::SetTypingTrue(identity)
        } else {
            HubCommand::SetTypingFalse(identity)
        };
        self.inner.transport.send(command).await
    }

    pub fn reveal(&self, id: &str) -> bool {
        self.inner.controller.reveal(id)
    }

    pub fn visibility(&self, message: &ChatMessage) -> Visibility {
        self.inner.controller.visibility(message)
    }

    pub fn messages(&self) -> watch::Receiver<MessageList> {
        self.inner.controller.messages()
    }

    pub fn visible_messages(&self) -> watch::Receiver<VisibleSet> {
        self.inner.controller.visible_messages()
    }

    pub fn countdown_events(&self) -> broadcast::Receiver<CountdownEvent> {
        self.inner.controller.countdown_events()
    }

    pub fn connected_users(&self) -> watch::Receiver<Vec<String>> {
        self.inner.connected_users.subscribe()
    }

    pub fn typing(&self) -> watch::Receiver<TypingOptions> {
        self.inner.typing.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    /// Leaves the room. Countdowns and listeners stop before the hub is
    /// told, so nothing reaches the presentation layer afterwards. Calling
    /// it again does nothing.
    pub async fn leave(&self) -> Result<(), ChatError> {
        if !self.teardown() {
            return Ok(());
        }
        log::info!("Leaving room {}", self.identity().room);
        self.inner.transport.send(HubCommand::LeaveChat).await
    }

    fn teardown(&self) -> bool {
        if self.inner.left.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.controller.teardown();
        let subscriptions: Vec<Subscription> = self.inner.lock_subscriptions().drain(..).collect();
        for subscription in subscriptions {
            subscription.cancel();
        }
        true
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, event: HubEvent) {
        if self.is_closed() {
            return;
        }
        match event {
            HubEvent::ReceiveMessage(message) => self.controller.on_message_arrived(message),
            HubEvent::ConnectedUser(users) => {
                self.connected_users.send_replace(users);
            }
            HubEvent::NewUser(text) => self.notify(NotificationLevel::Success, text),
            HubEvent::TypingTrue(username) => {
                self.typing.send_replace(TypingOptions {
                    is_typing: true,
                    username,
                });
            }
            HubEvent::TypingFalse => {
                self.typing.send_replace(TypingOptions::default());
            }
            HubEvent::OnConnected(text) => self.notify(NotificationLevel::Warning, text),
            HubEvent::Ping => self.notify(NotificationLevel::Warning, "ping from server"),
        }
    }

    fn notify(&self, level: NotificationLevel, text: impl Into<String>) {
        let _ = self.notifications.send(Notification::new(level, text));
    }
}
