use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::broadcast;

use super::*;
use crate::common::Delivery;

struct MockTransport {
    sent: Mutex<Vec<HubCommand>>,
    reject: AtomicBool,
    events: broadcast::Sender<HubEvent>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            reject: AtomicBool::new(false),
            events,
        })
    }

    fn reject_sends(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    fn emit(&self, event: HubEvent) {
        let _ = self.events.send(event);
    }

    fn sent(&self) -> Vec<HubCommand> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_names(&self) -> Vec<&'static str> {
        self.sent().iter().map(HubCommand::name).collect()
    }
}

impl HubTransport for MockTransport {
    fn send(&self, command: HubCommand) -> BoxFuture<'static, Result<(), ChatError>> {
        self.sent.lock().unwrap().push(command);
        let result = if self.reject.load(Ordering::SeqCst) {
            Err(ChatError::Transport("rejected by hub".into()))
        } else {
            Ok(())
        };
        futures::future::ready(result).boxed()
    }

    fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }
}

fn identity() -> UserRoom {
    UserRoom {
        user: "ana".into(),
        room: "lobby".into(),
    }
}

async fn start(transport: &Arc<MockTransport>) -> ChatSession {
    ChatSession::start(transport.clone(), SessionContext::new(identity()))
        .await
        .unwrap()
}

/// Lets the listener tasks drain whatever was emitted.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn incoming(id: &str, user: &str, disappear_after: Option<u32>) -> ChatMessage {
    ChatMessage {
        id: id.into(),
        content: format!("from {user}"),
        user: user.into(),
        message_time: 1_700_000_000,
        disappear_after,
        remaining_time: disappear_after,
        remaining_percentage: None,
        delivery: Delivery::Delivered,
    }
}

#[tokio::test(start_paused = true)]
async fn start_joins_the_room() {
    let transport = MockTransport::new();
    let _session = start(&transport).await;

    assert_eq!(transport.sent(), [HubCommand::JoinRoom(identity())]);
}

#[tokio::test(start_paused = true)]
async fn rejected_join_is_an_error() {
    let transport = MockTransport::new();
    transport.reject_sends(true);

    let result = ChatSession::start(transport.clone(), SessionContext::new(identity())).await;
    assert!(matches!(result, Err(ChatError::Transport(_))));
}

#[tokio::test(start_paused = true)]
async fn sent_message_carries_timer_and_counts_down_after_echo() {
    let transport = MockTransport::new();
    let session = start(&transport).await;

    let sent = session
        .send_message("self destruct", DisappearTimer::Secs10)
        .await
        .unwrap();
    assert_eq!(sent.disappear_after, Some(10));
    assert_eq!(sent.remaining_time, Some(10));
    assert_eq!(transport.sent_names(), ["JoinRoom", "SendMessage"]);

    let list = session.controller().snapshot();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].delivery, Delivery::Delivered);

    let mut echo = sent.clone();
    echo.message_time = 1_700_000_123;
    transport.emit(HubEvent::ReceiveMessage(echo));
    settle().await;

    assert_eq!(session.controller().snapshot().len(), 1);
    assert_eq!(session.controller().active_countdowns(), 1);

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert!(session.controller().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_send_removes_the_local_copy() {
    let transport = MockTransport::new();
    let session = start(&transport).await;
    let mut notifications = session.notifications();
    transport.reject_sends(true);

    let result = session.send_message("lost", DisappearTimer::Off).await;

    assert!(matches!(result, Err(ChatError::Transport(_))));
    assert!(session.controller().snapshot().is_empty());
    let notification = notifications.try_recv().unwrap();
    assert_eq!(notification.level, NotificationLevel::Error);
    assert!(notification.text.contains("rejected by hub"));
}

#[tokio::test(start_paused = true)]
async fn blank_message_is_not_sent() {
    let transport = MockTransport::new();
    let session = start(&transport).await;

    let result = session.send_message("   ", DisappearTimer::Secs30).await;

    assert!(matches!(result, Err(ChatError::EmptyMessage)));
    assert_eq!(transport.sent_names(), ["JoinRoom"]);
}

#[tokio::test(start_paused = true)]
async fn hub_events_update_observables() {
    let transport = MockTransport::new();
    let session = start(&transport).await;
    let users = session.connected_users();
    let typing = session.typing();
    let mut notifications = session.notifications();

    transport.emit(HubEvent::ConnectedUser(vec!["ana".into(), "bo".into()]));
    transport.emit(HubEvent::TypingTrue("bo".into()));
    transport.emit(HubEvent::NewUser("bo joined lobby".into()));
    settle().await;

    assert_eq!(*users.borrow(), ["ana", "bo"]);
    assert_eq!(
        *typing.borrow(),
        TypingOptions {
            is_typing: true,
            username: "bo".into()
        }
    );
    let notification = notifications.try_recv().unwrap();
    assert_eq!(notification.level, NotificationLevel::Success);
    assert_eq!(notification.text, "bo joined lobby");

    transport.emit(HubEvent::TypingFalse);
    transport.emit(HubEvent::Ping);
    settle().await;

    assert!(!typing.borrow().is_typing);
    assert_eq!(
        notifications.try_recv().unwrap().level,
        NotificationLevel::Warning
    );
}

#[tokio::test(start_paused = true)]
async fn typing_commands_carry_identity() {
    let transport = MockTransport::new();
    let session = start(&transport).await;

    session.set_typing(true).await.unwrap();
    session.set_typing(false).await.unwrap();

    let sent = transport.sent();
    assert_eq!(sent[1], HubCommand::SetTypingTrue(identity()));
    assert_eq!(sent[2], HubCommand::SetTypingFalse(identity()));
}

#[tokio::test(start_paused = true)]
async fn others_disappearing_message_waits_for_reveal() {
    let transport = MockTransport::new();
    let session = start(&transport).await;

    let secret = incoming("m1", "bo", Some(10));
    transport.emit(HubEvent::ReceiveMessage(secret.clone()));
    settle().await;

    assert_eq!(session.visibility(&secret), Visibility::Hidden);
    assert!(session.reveal("m1"));
    assert!(!session.reveal("m1"));
    assert_eq!(session.visibility(&secret), Visibility::Visible);
    assert_eq!(session.visible_messages().borrow().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn leave_cancels_everything() {
    let transport = MockTransport::new();
    let session = start(&transport).await;
    let mut list = session.messages();
    let users = session.connected_users();

    transport.emit(HubEvent::ReceiveMessage(incoming("m1", "ana", Some(10))));
    transport.emit(HubEvent::ReceiveMessage(incoming("m2", "ana", Some(30))));
    settle().await;
    assert_eq!(session.controller().active_countdowns(), 2);

    session.leave().await.unwrap();
    list.mark_unchanged();

    transport.emit(HubEvent::ReceiveMessage(incoming("m3", "bo", None)));
    transport.emit(HubEvent::ConnectedUser(vec!["bo".into()]));
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(!list.has_changed().unwrap());
    assert!(users.borrow().is_empty());
    assert_eq!(session.controller().active_countdowns(), 0);
    assert!(matches!(
        session.send_message("too late", DisappearTimer::Off).await,
        Err(ChatError::Disconnected)
    ));

    session.leave().await.unwrap();
    assert_eq!(transport.sent_names(), ["JoinRoom", "LeaveChat"]);
}
