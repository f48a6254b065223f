use std::collections::BTreeMap;

use chrono::Utc;
use libp2p::PeerId;
use libp2p::gossipsub::IdentTopic;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{ChatMessage, HubEvent, UserRoom};

/// What peers in a room say to each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Message {
        message: ChatMessage,
    },
    /// Sent when joining, if anyone is there to hear it.
    Joined {
        user: String,
        joined_at: i64,
    },
    /// Sent whenever a peer subscribes to the room, so it learns who is here.
    Present {
        user: String,
        joined_at: i64,
    },
    Left {
        user: String,
    },
    Typing {
        user: String,
        is_typing: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub nonce: String,
    pub sent_at: i64,
    pub frame: Frame,
}

impl Envelope {
    pub fn new(frame: Frame) -> Self {
        Self {
            nonce: Uuid::new_v4().to_string(),
            sent_at: Utc::now().timestamp(),
            frame,
        }
    }
}

/// The room this node is in, and when it got there (milliseconds).
pub struct JoinedRoom {
    pub identity: UserRoom,
    pub topic: IdentTopic,
    pub joined_at: i64,
}

impl JoinedRoom {
    pub fn present(&self) -> Frame {
        Frame::Present {
            user: self.identity.user.clone(),
            joined_at: self.joined_at,
        }
    }
}

/// Remote members of the joined room by peer.
#[derive(Debug, Default)]
pub struct Roster {
    members: BTreeMap<PeerId, String>,
}

impl Roster {
    /// Returns `(added, changed)`: whether the peer is new, and whether the
    /// listed names changed.
    fn track(&mut self, peer_id: PeerId, user: &str) -> (bool, bool) {
        match self.members.insert(peer_id, user.to_string()) {
            None => (true, true),
            Some(previous) => (false, previous != user),
        }
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> bool {
        self.members.remove(peer_id).is_some()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// The local user plus every member, sorted and deduplicated.
    pub fn users(&self, own: &str) -> Vec<String> {
        let mut users: Vec<String> = std::iter::once(own.to_string())
            .chain(self.members.values().cloned())
            .collect();
        users.sort();
        users.dedup();
        users
    }
}

/// Applies a frame received in `room` to the roster and returns the hub
/// events it produces.
///
/// A newly seen member is announced as a new user when it sent `Joined`, or
/// when it joined no earlier than we did. Members that were already in the
/// room when we arrived only update the user list.
pub fn apply_frame(
    room: &JoinedRoom,
    roster: &mut Roster,
    source: Option<PeerId>,
    frame: Frame,
) -> Vec<HubEvent> {
    let mut events = Vec::new();
    let own = &room.identity.user;

    match frame {
        Frame::Message { message } => events.push(HubEvent::ReceiveMessage(message)),
        Frame::Joined { user, .. } => {
            member_seen(room, roster, source, &user, true, &mut events);
        }
        Frame::Present { user, joined_at } => {
            let later = joined_at >= room.joined_at;
            member_seen(room, roster, source, &user, later, &mut events);
        }
        Frame::Left { user } => {
            log::info!("{user} left {}", room.identity.room);
            if source.is_some_and(|peer_id| roster.remove(&peer_id)) {
                events.push(HubEvent::ConnectedUser(roster.users(own)));
            }
        }
        Frame::Typing { user, is_typing } => {
            if is_typing {
                events.push(HubEvent::TypingTrue(user));
            } else {
                events.push(HubEvent::TypingFalse);
            }
        }
    }

    events
}

fn member_seen(
    room: &JoinedRoom,
    roster: &mut Roster,
    source: Option<PeerId>,
    user: &str,
    is_new_arrival: bool,
    events: &mut Vec<HubEvent>,
) {
    // Signed gossip always names its author.
    let Some(peer_id) = source else {
        return;
    };
    let (added, changed) = roster.track(peer_id, user);
    if added && is_new_arrival {
        events.push(HubEvent::NewUser(format!(
            "{user} joined {}",
            room.identity.room
        )));
    }
    if changed {
        events.push(HubEvent::ConnectedUser(roster.users(&room.identity.user)));
    }
}
