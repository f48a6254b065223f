use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use super::countdown::Countdown;
use super::registry::TimerRegistry;
use crate::common::types::generate_message_id;
use crate::common::{ChatMessage, Delivery};

const COUNTDOWN_EVENT_CAPACITY: usize = 256;
const MIN_TICK: Duration = Duration::from_millis(1);

/// What revealing someone else's disappearing message does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealPolicy {
    /// Reveal only shows the message; it stays until the session ends.
    #[default]
    VisibilityOnly,
    /// Reveal also starts the message's countdown.
    CountdownOnReveal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Visible,
}

/// Progress of a single countdown.
#[derive(Debug, Clone, PartialEq)]
pub enum CountdownEvent {
    Tick {
        id: String,
        remaining: u32,
        percentage: f64,
    },
    Expired {
        id: String,
    },
}

pub type MessageList = Arc<Vec<ChatMessage>>;
pub type VisibleSet = Arc<HashSet<String>>;

/// Owns the active message list and the per-message disappearing timers.
///
/// The list is only ever replaced as a whole, so subscribers never observe a
/// half-applied update. After [`teardown`](Self::teardown) every operation,
/// including ticks of countdowns already in flight, is a no-op.
#[derive(Clone)]
pub struct DisappearingController {
    inner: Arc<Inner>,
}

struct Inner {
    current_user: String,
    policy: RevealPolicy,
    tick: Duration,
    closed: AtomicBool,
    messages: watch::Sender<MessageList>,
    visible: watch::Sender<VisibleSet>,
    countdowns: broadcast::Sender<CountdownEvent>,
    timers: TimerRegistry,
}

impl DisappearingController {
    /// `tick` is the countdown period, at least one millisecond.
    pub fn new(current_user: impl Into<String>, policy: RevealPolicy, tick: Duration) -> Self {
        let (messages, _) = watch::channel(Arc::new(Vec::new()));
        let (visible, _) = watch::channel(Arc::new(HashSet::new()));
        let (countdowns, _) = broadcast::channel(COUNTDOWN_EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                current_user: current_user.into(),
                policy,
                tick: tick.max(MIN_TICK),
                closed: AtomicBool::new(false),
                messages,
                visible,
                countdowns,
                timers: TimerRegistry::new(),
            }),
        }
    }

    pub fn current_user(&self) -> &str {
        &self.inner.current_user
    }

    pub fn messages(&self) -> watch::Receiver<MessageList> {
        self.inner.messages.subscribe()
    }

    pub fn visible_messages(&self) -> watch::Receiver<VisibleSet> {
        self.inner.visible.subscribe()
    }

    pub fn countdown_events(&self) -> broadcast::Receiver<CountdownEvent> {
        self.inner.countdowns.subscribe()
    }

    pub fn snapshot(&self) -> MessageList {
        self.inner.messages.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn active_countdowns(&self) -> usize {
        self.inner.timers.len()
    }

    pub fn visibility(&self, message: &ChatMessage) -> Visibility {
        if message.user == self.inner.current_user
            || !message.is_disappearing()
            || self.inner.visible.borrow().contains(&message.id)
        {
            Visibility::Visible
        } else {
            Visibility::Hidden
        }
    }

    /// Adds `id` to the visibility set. Returns `false` when it was already there.
    pub fn reveal(&self, id: &str) -> bool {
        let inner = &self.inner;
        let revealed = inner.visible.send_if_modified(|set| {
            if inner.is_closed() || set.contains(id) {
                return false;
            }
            let mut next = HashSet::clone(set);
            next.insert(id.to_string());
            *set = Arc::new(next);
            true
        });

        if revealed {
            log::debug!("Revealed message {id}");
            if inner.policy == RevealPolicy::CountdownOnReveal {
                self.schedule_disappearance(id);
            }
        }
        revealed
    }

    /// Appends a message coming from the hub, or replaces the pending local
    /// copy with the same id. The author's own disappearing messages start
    /// counting down right away.
    pub fn on_message_arrived(&self, mut message: ChatMessage) {
        normalize(&mut message);
        message.delivery = Delivery::Delivered;

        let id = message.id.clone();
        let own = message.user == self.inner.current_user;
        let disappearing = message.is_disappearing();

        let updated = self.inner.replace_list(|list| {
            match list.iter().position(|existing| existing.id == message.id) {
                Some(index) => {
                    let existing = &list[index];
                    if existing.remaining_percentage.is_some() {
                        message.remaining_time = existing.remaining_time;
                        message.remaining_percentage = existing.remaining_percentage;
                    }
                    list[index] = message;
                }
                None => list.push(message),
            }
            true
        });

        if updated && own && disappearing {
            self.schedule_disappearance(&id);
        }
    }

    /// Adds the optimistic local copy of an outgoing message.
    pub fn insert_pending(&self, mut message: ChatMessage) -> bool {
        normalize(&mut message);
        message.delivery = Delivery::Pending;
        self.inner.replace_list(|list| {
            if list.iter().any(|existing| existing.id == message.id) {
                return false;
            }
            list.push(message);
            true
        })
    }

    /// Marks a pending message as acknowledged by the hub.
    pub fn confirm(&self, id: &str) -> bool {
        self.inner.replace_list(|list| {
            match list
                .iter_mut()
                .find(|message| message.id == id && message.is_pending())
            {
                Some(message) => {
                    message.delivery = Delivery::Delivered;
                    true
                }
                None => false,
            }
        })
    }

    /// Drops a message the hub rejected, together with its countdown.
    pub fn discard(&self, id: &str) -> bool {
        self.inner.timers.cancel(id);
        self.inner.remove(id)
    }

    /// Starts the per-tick countdown for message `id`.
    ///
    /// No-op when the message is unknown, has no disappear duration, or
    /// already counts down.
    pub fn schedule_disappearance(&self, id: &str) -> bool {
        if self.inner.is_closed() {
            return false;
        }

        let countdown = {
            let list = self.inner.messages.borrow();
            let Some(message) = list.iter().find(|message| message.id == id) else {
                log::debug!("Not scheduling unknown message {id}");
                return false;
            };
            let Some(total) = message.disappear_duration() else {
                return false;
            };
            let remaining = message
                .remaining_time
                .filter(|remaining| *remaining > 0)
                .unwrap_or(total);
            match Countdown::resume(total, remaining) {
                Some(countdown) => countdown,
                None => return false,
            }
        };

        let weak = Arc::downgrade(&self.inner);
        let key = id.to_string();
        let period = self.inner.tick;
        let spawned = self.inner.timers.spawn_keyed(id, move |generation| {
            run_countdown(weak, key, countdown, period, generation)
        });

        if spawned {
            log::debug!(
                "Countdown started for {id}: {}s of {}s",
                countdown.remaining(),
                countdown.total()
            );
        }
        spawned
    }

    /// Ends the session: cancels every countdown, clears the list and the
    /// visibility set. Later calls are no-ops.
    pub fn teardown(&self) {
        let inner = &self.inner;
        let first = inner.messages.send_if_modified(|list| {
            if inner.closed.swap(true, Ordering::SeqCst) {
                return false;
            }
            *list = Arc::new(Vec::new());
            true
        });
        if !first {
            return;
        }

        let cancelled = inner.timers.cancel_all();
        inner.visible.send_replace(Arc::new(HashSet::new()));
        log::info!("Disappearing messages torn down, {cancelled} countdown(s) cancelled");
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Applies `edit` to a copy of the list and publishes the copy when
    /// `edit` reports a change. The closed check and the publish happen
    /// under the channel's lock, so nothing is published after teardown.
    fn replace_list(&self, edit: impl FnOnce(&mut Vec<ChatMessage>) -> bool) -> bool {
        self.messages.send_if_modified(|current| {
            if self.is_closed() {
                return false;
            }
            let mut next = Vec::clone(current);
            if !edit(&mut next) {
                return false;
            }
            *current = Arc::new(next);
            true
        })
    }

    fn publish_progress(&self, id: &str, countdown: &Countdown) -> bool {
        self.replace_list(|list| {
            let Some(message) = list.iter_mut().find(|message| message.id == id) else {
                return false;
            };
            message.remaining_time = Some(countdown.remaining());
            message.remaining_percentage = Some(countdown.percentage());
            let _ = self.countdowns.send(CountdownEvent::Tick {
                id: id.to_string(),
                remaining: countdown.remaining(),
                percentage: countdown.percentage(),
            });
            true
        })
    }

    fn expire(&self, id: &str) {
        let removed = self.replace_list(|list| {
            let before = list.len();
            list.retain(|message| message.id != id);
            if list.len() == before {
                return false;
            }
            let _ = self.countdowns.send(CountdownEvent::Expired { id: id.to_string() });
            true
        });
        if removed {
            self.forget_visibility(id);
            log::debug!("Message {id} disappeared");
        }
    }

    fn remove(&self, id: &str) -> bool {
        let removed = self.replace_list(|list| {
            let before = list.len();
            list.retain(|message| message.id != id);
            list.len() != before
        });
        if removed {
            self.forget_visibility(id);
        }
        removed
    }

    fn forget_visibility(&self, id: &str) {
        self.visible.send_if_modified(|set| {
            if self.is_closed() || !set.contains(id) {
                return false;
            }
            let mut next = HashSet::clone(set);
            next.remove(id);
            *set = Arc::new(next);
            true
        });
    }
}

async fn run_countdown(
    inner: Weak<Inner>,
    id: String,
    mut countdown: Countdown,
    period: Duration,
    generation: u64,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    if !publish(&inner, &id, &countdown) {
        finish(&inner, &id, generation);
        return;
    }

    loop {
        ticker.tick().await;
        countdown.tick();

        if !publish(&inner, &id, &countdown) {
            finish(&inner, &id, generation);
            return;
        }

        if countdown.is_expired() {
            if let Some(inner) = inner.upgrade() {
                inner.expire(&id);
                inner.timers.forget(&id, generation);
            }
            return;
        }
    }
}

fn publish(inner: &Weak<Inner>, id: &str, countdown: &Countdown) -> bool {
    inner
        .upgrade()
        .is_some_and(|inner| inner.publish_progress(id, countdown))
}

fn finish(inner: &Weak<Inner>, id: &str, generation: u64) {
    if let Some(inner) = inner.upgrade() {
        inner.timers.forget(id, generation);
    }
}

fn normalize(message: &mut ChatMessage) {
    if message.id.trim().is_empty() {
        message.id = generate_message_id();
    }
    if message.disappear_duration().is_none() {
        message.disappear_after = None;
        message.remaining_time = None;
        message.remaining_percentage = None;
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::common::DisappearTimer;

    const TICK: Duration = Duration::from_secs(1);

    fn controller(policy: RevealPolicy) -> DisappearingController {
        DisappearingController::new("ana", policy, TICK)
    }

    fn message(id: &str, user: &str, content: &str, disappear_after: Option<u32>) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            content: content.to_string(),
            user: user.to_string(),
            message_time: 1_700_000_000,
            disappear_after,
            remaining_time: disappear_after,
            remaining_percentage: None,
            delivery: Delivery::Delivered,
        }
    }

    fn ids(controller: &DisappearingController) -> Vec<String> {
        controller.snapshot().iter().map(|m| m.id.clone()).collect()
    }

    fn drain(rx: &mut broadcast::Receiver<CountdownEvent>) -> Vec<CountdownEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_tick_period_still_expires_messages() {
        let controller =
            DisappearingController::new("ana", RevealPolicy::VisibilityOnly, Duration::ZERO);
        controller.on_message_arrived(message("m1", "ana", "bye soon", Some(10)));

        sleep_ms(1_000).await;

        assert!(controller.snapshot().is_empty());
        assert_eq!(controller.active_countdowns(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn own_disappearing_message_is_gone_after_its_duration() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        controller.on_message_arrived(message("m1", "ana", "bye soon", Some(10)));

        sleep_ms(9_500).await;
        let list = controller.snapshot();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].remaining_time, Some(1));
        assert_eq!(list[0].remaining_percentage, Some(10.0));

        sleep_ms(1_000).await;
        assert!(controller.snapshot().is_empty());
        assert_eq!(controller.active_countdowns(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn percentage_runs_from_hundred_to_zero() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        let mut events = controller.countdown_events();
        controller.on_message_arrived(message("m1", "ana", "tick", Some(10)));

        sleep_ms(10_500).await;
        let events = drain(&mut events);

        let percentages: Vec<f64> = events
            .iter()
            .filter_map(|event| match event {
                CountdownEvent::Tick { percentage, .. } => Some(*percentage),
                CountdownEvent::Expired { .. } => None,
            })
            .collect();
        let expected: Vec<f64> = (0..=10).rev().map(|step| f64::from(step * 10)).collect();
        assert_eq!(percentages, expected);
        assert!(percentages.windows(2).all(|pair| pair[0] > pair[1]));
        assert_eq!(
            events.last(),
            Some(&CountdownEvent::Expired { id: "m1".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn message_without_timer_is_never_removed() {
        let controller = controller(RevealPolicy::CountdownOnReveal);
        controller.on_message_arrived(message("m1", "ana", "stays", None));
        controller.on_message_arrived(message("m2", "bo", "stays too", None));
        controller.reveal("m2");

        assert!(!controller.schedule_disappearance("m1"));
        sleep_ms(120_000).await;
        assert_eq!(ids(&controller), ["m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_is_idempotent() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        let visible = controller.visible_messages();

        assert!(controller.reveal("m1"));
        assert!(!controller.reveal("m1"));
        assert_eq!(visible.borrow().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn others_disappearing_messages_arrive_hidden() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        let incoming = message("m1", "bo", "secret", Some(10));
        controller.on_message_arrived(incoming.clone());

        assert_eq!(controller.visibility(&incoming), Visibility::Hidden);
        assert_eq!(controller.active_countdowns(), 0);

        controller.reveal("m1");
        assert_eq!(controller.visibility(&incoming), Visibility::Visible);

        sleep_ms(30_000).await;
        assert_eq!(ids(&controller), ["m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn own_and_plain_messages_are_visible() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        let own = message("m1", "ana", "mine", Some(10));
        let plain = message("m2", "bo", "hello", None);

        assert_eq!(controller.visibility(&own), Visibility::Visible);
        assert_eq!(controller.visibility(&plain), Visibility::Visible);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_on_reveal_policy_starts_timer() {
        let controller = controller(RevealPolicy::CountdownOnReveal);
        controller.on_message_arrived(message("m1", "bo", "secret", Some(10)));
        controller.reveal("m1");
        assert_eq!(controller.active_countdowns(), 1);

        sleep_ms(10_500).await;
        assert!(controller.snapshot().is_empty());
        assert!(controller.visible_messages().borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_all_further_updates() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        let mut list = controller.messages();
        let mut events = controller.countdown_events();
        controller.on_message_arrived(message("m1", "ana", "a", Some(10)));
        controller.on_message_arrived(message("m2", "ana", "b", Some(30)));

        sleep_ms(3_500).await;
        controller.teardown();
        assert!(controller.snapshot().is_empty());
        assert_eq!(controller.active_countdowns(), 0);
        list.mark_unchanged();
        drain(&mut events);

        sleep_ms(60_000).await;
        assert!(!list.has_changed().unwrap());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        controller.on_message_arrived(message("m3", "ana", "late", Some(10)));
        assert!(!controller.reveal("m3"));
        assert!(!list.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn different_durations_expire_in_order() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        let mut events = controller.countdown_events();
        controller.on_message_arrived(message("slow", "ana", "same text", Some(30)));
        controller.on_message_arrived(message("fast", "ana", "same text", Some(10)));

        sleep_ms(10_500).await;
        assert_eq!(ids(&controller), ["slow"]);

        sleep_ms(20_000).await;
        assert!(controller.snapshot().is_empty());

        let expired: Vec<String> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                CountdownEvent::Expired { id } => Some(id),
                CountdownEvent::Tick { .. } => None,
            })
            .collect();
        assert_eq!(expired, ["fast", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduling_twice_keeps_one_countdown() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        controller.on_message_arrived(message("m1", "ana", "x", Some(10)));

        assert!(!controller.schedule_disappearance("m1"));
        assert_eq!(controller.active_countdowns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn echo_replaces_pending_copy() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        let mut outgoing = ChatMessage::outgoing("hi", DisappearTimer::Secs10);
        outgoing.user = "ana".into();
        let id = outgoing.id.clone();

        assert!(controller.insert_pending(outgoing.clone()));
        assert!(controller.snapshot()[0].is_pending());
        assert_eq!(controller.active_countdowns(), 0);

        controller.on_message_arrived(outgoing);
        let list = controller.snapshot();
        assert_eq!(list.len(), 1);
        assert!(!list[0].is_pending());
        assert!(!controller.confirm(&id));
        assert_eq!(controller.active_countdowns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn discard_removes_entry_and_countdown() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        let mut events = controller.countdown_events();
        controller.on_message_arrived(message("m1", "ana", "x", Some(10)));
        sleep_ms(2_500).await;

        assert!(controller.discard("m1"));
        drain(&mut events);
        sleep_ms(20_000).await;

        assert!(controller.snapshot().is_empty());
        assert_eq!(controller.active_countdowns(), 0);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_defaults_to_no_countdown() {
        let controller = controller(RevealPolicy::VisibilityOnly);
        let mut incoming = message("", "ana", "no id", Some(0));
        incoming.remaining_time = Some(5);
        controller.on_message_arrived(incoming);

        let list = controller.snapshot();
        assert_eq!(list.len(), 1);
        assert!(!list[0].id.is_empty());
        assert_eq!(list[0].disappear_after, None);
        assert_eq!(list[0].remaining_time, None);
        assert_eq!(controller.active_countdowns(), 0);
    }
}
