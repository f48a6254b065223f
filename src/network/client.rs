use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use libp2p::gossipsub::{self, IdentTopic, TopicHash};
use libp2p::mdns;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identity};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::common::{ChatMessage, HubCommand, HubEvent, NetworkCommand, UserRoom};
use crate::config::{self, AppConfig};
use crate::error::ChatError;

use super::HubTransport;
use super::behavior::{HubBehavior, HubBehaviorEvent, build_behavior, room_topic};
use super::room::{Envelope, Frame, JoinedRoom, Roster, apply_frame};
use super::transport::build_transport;

const COMMAND_CAPACITY: usize = 100;
const EVENT_CAPACITY: usize = 256;
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
/// How long the swarm keeps running after leaving so `Left` goes out.
const LEAVE_FLUSH: Duration = Duration::from_secs(1);

/// Settings for the swarm task.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub listen_addr: Multiaddr,
    pub bootstrap: Vec<Multiaddr>,
    pub topic_prefix: String,
    pub mdns: bool,
    /// Relay mode: forward this room's gossip without joining as a user.
    pub relay_room: Option<String>,
    /// Where a relay records its own address for clients to bootstrap from.
    pub config_path: Option<String>,
}

impl HubConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ChatError> {
        let listen_addr = config.listen_addr.parse::<Multiaddr>().map_err(|err| {
            ChatError::Config(format!("invalid listen_addr `{}`: {err}", config.listen_addr))
        })?;

        Ok(Self {
            listen_addr,
            bootstrap: parse_bootstrap_addrs(&config.bootstrap_nodes),
            topic_prefix: config.topic_prefix.clone(),
            mdns: config.mdns,
            relay_room: None,
            config_path: None,
        })
    }
}

pub fn parse_bootstrap_addrs(entries: &[String]) -> Vec<Multiaddr> {
    entries
        .iter()
        .filter_map(|entry| match entry.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(err) => {
                log::warn!("Invalid multiaddr `{entry}`: {err}");
                None
            }
        })
        .collect()
}

/// Cloneable client side of the hub connection.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<NetworkCommand>,
    events: broadcast::Sender<HubEvent>,
}

impl HubTransport for HubHandle {
    fn send(&self, command: HubCommand) -> BoxFuture<'static, Result<(), ChatError>> {
        let commands = self.commands.clone();
        async move {
            let (reply, response) = oneshot::channel();
            commands
                .send(NetworkCommand { command, reply })
                .await
                .map_err(|_| ChatError::Disconnected)?;
            response.await.map_err(|_| ChatError::Disconnected)?
        }
        .boxed()
    }

    fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }
}

/// The swarm task behind a [`HubHandle`]: rooms are gossipsub topics, the
/// connected-user list is kept from presence frames.
pub struct HubClient {
    config: HubConfig,
    event_sender: broadcast::Sender<HubEvent>,
    command_receiver: mpsc::Receiver<NetworkCommand>,
    joined: Option<JoinedRoom>,
    relay_topic: Option<IdentTopic>,
    roster: Roster,
    persisted_addr: bool,
}

impl HubClient {
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let client = Self {
            config,
            event_sender: event_tx.clone(),
            command_receiver: cmd_rx,
            joined: None,
            relay_topic: None,
            roster: Roster::default(),
            persisted_addr: false,
        };
        let handle = HubHandle {
            commands: cmd_tx,
            events: event_tx,
        };
        (client, handle)
    }

    pub async fn run(mut self) -> Result<(), ChatError> {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());
        log::info!("Local PeerID: {local_peer_id}");

        let transport = build_transport(&local_key)?;
        let behavior = build_behavior(&local_key, local_peer_id, self.config.mdns)?;

        let mut swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor().with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT),
        );

        swarm
            .listen_on(self.config.listen_addr.clone())
            .map_err(|err| ChatError::Transport(format!("listen failed: {err}")))?;

        for addr in self.config.bootstrap.clone() {
            log::info!("Dialing bootstrap peer at {addr}");
            if let Err(err) = swarm.dial(addr.clone()) {
                log::warn!("Failed to dial bootstrap peer {addr}: {err}");
            }
        }

        if let Some(room) = self.config.relay_room.clone() {
            let topic = room_topic(&self.config.topic_prefix, &room);
            swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(&topic)
                .map_err(|err| ChatError::Transport(format!("subscribe failed: {err:?}")))?;
            log::info!("Relaying room {room}");
            self.relay_topic = Some(topic);
        }

        log::info!("Hub event loop started");

        let announced_leave = loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command, &mut swarm) {
                                break true;
                            }
                        }
                        None => break self.leave(&mut swarm),
                    }
                }
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(event, &mut swarm, local_peer_id);
                }
            }
        };

        if announced_leave {
            self.flush(&mut swarm, local_peer_id).await;
        }

        log::info!("Hub event loop stopped");
        Ok(())
    }

    /// Keeps the swarm polled for [`LEAVE_FLUSH`] so queued frames and the
    /// unsubscribe reach the other peers.
    async fn flush(&mut self, swarm: &mut Swarm<HubBehavior>, local_peer_id: PeerId) {
        let deadline = tokio::time::sleep(LEAVE_FLUSH);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(event, swarm, local_peer_id);
                }
            }
        }
    }

    /// Returns `false` once the connection should stop.
    fn handle_command(&mut self, command: NetworkCommand, swarm: &mut Swarm<HubBehavior>) -> bool {
        let NetworkCommand { command, reply } = command;
        let name = command.name();

        let (result, keep_running) = match command {
            HubCommand::JoinRoom(identity) => (self.join(identity, swarm), true),
            HubCommand::SendMessage(message) => (self.send_chat(message, swarm), true),
            HubCommand::SetTypingTrue(identity) => (self.send_typing(identity, true, swarm), true),
            HubCommand::SetTypingFalse(identity) => {
                (self.send_typing(identity, false, swarm), true)
            }
            HubCommand::LeaveChat => {
                self.leave(swarm);
                (Ok(()), false)
            }
        };

        if let Err(err) = &result {
            log::warn!("{name} failed: {err}");
        }
        if reply.send(result).is_err() {
            log::debug!("{name} caller went away before the reply");
        }
        keep_running
    }

    fn join(&mut self, identity: UserRoom, swarm: &mut Swarm<HubBehavior>) -> Result<(), ChatError> {
        self.leave(swarm);

        let topic = room_topic(&self.config.topic_prefix, &identity.room);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|err| ChatError::Transport(format!("subscribe failed: {err:?}")))?;

        let joined_at = Utc::now().timestamp_millis();
        let joined_frame = Frame::Joined {
            user: identity.user.clone(),
            joined_at,
        };
        publish_frame(&topic, joined_frame, swarm)?;

        log::info!("Joined room {} as {}", identity.room, identity.user);
        self.emit(HubEvent::OnConnected(format!(
            "Connected to {} as {}",
            identity.room, identity.user
        )));
        self.joined = Some(JoinedRoom {
            identity,
            topic,
            joined_at,
        });
        self.emit_roster();
        Ok(())
    }

    fn send_chat(
        &mut self,
        mut message: ChatMessage,
        swarm: &mut Swarm<HubBehavior>,
    ) -> Result<(), ChatError> {
        let joined = self.joined.as_ref().ok_or(ChatError::NotJoined)?;
        message.user = joined.identity.user.clone();
        message.message_time = Utc::now().timestamp();

        publish_frame(
            &joined.topic,
            Frame::Message {
                message: message.clone(),
            },
            swarm,
        )?;
        self.emit(HubEvent::ReceiveMessage(message));
        Ok(())
    }

    fn send_typing(
        &mut self,
        identity: UserRoom,
        is_typing: bool,
        swarm: &mut Swarm<HubBehavior>,
    ) -> Result<(), ChatError> {
        let joined = self.joined.as_ref().ok_or(ChatError::NotJoined)?;
        publish_frame(
            &joined.topic,
            Frame::Typing {
                user: identity.user,
                is_typing,
            },
            swarm,
        )
    }

    /// Announces `Left` and unsubscribes. Returns whether there was a room
    /// to leave.
    fn leave(&mut self, swarm: &mut Swarm<HubBehavior>) -> bool {
        let Some(joined) = self.joined.take() else {
            return false;
        };
        let left = Frame::Left {
            user: joined.identity.user.clone(),
        };
        if let Err(err) = publish_frame(&joined.topic, left, swarm) {
            log::warn!("Failed to announce leaving {}: {err}", joined.identity.room);
        }
        let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&joined.topic);
        self.roster.clear();
        log::info!("Left room {}", joined.identity.room);
        true
    }

    fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<HubBehaviorEvent>,
        swarm: &mut Swarm<HubBehavior>,
        local_peer_id: PeerId,
    ) {
        match event {
            SwarmEvent::Behaviour(HubBehaviorEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => {
                self.handle_frame(message.source, &message.topic, &message.data);
            }
            SwarmEvent::Behaviour(HubBehaviorEvent::Gossipsub(gossipsub::Event::Subscribed {
                peer_id,
                topic,
            })) => {
                if let Some(joined) = self.joined_on(&topic) {
                    log::debug!("{peer_id} subscribed to {}", joined.identity.room);
                    if let Err(err) = publish_frame(&joined.topic, joined.present(), swarm) {
                        log::warn!("Failed to announce presence: {err}");
                    }
                }
            }
            SwarmEvent::Behaviour(HubBehaviorEvent::Gossipsub(
                gossipsub::Event::Unsubscribed { peer_id, topic },
            )) => {
                if self.joined_on(&topic).is_some() {
                    self.drop_member(&peer_id);
                }
            }
            SwarmEvent::Behaviour(HubBehaviorEvent::Mdns(mdns::Event::Discovered(list))) => {
                for (peer_id, addr) in list {
                    log::debug!("Discovered {peer_id} at {addr}");
                    swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                }
            }
            SwarmEvent::Behaviour(HubBehaviorEvent::Mdns(mdns::Event::Expired(list))) => {
                for (peer_id, _) in list {
                    swarm
                        .behaviour_mut()
                        .gossipsub
                        .remove_explicit_peer(&peer_id);
                    self.drop_member(&peer_id);
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established: 0,
                ..
            } => {
                log::debug!("Disconnected from {peer_id}");
                self.drop_member(&peer_id);
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address}");
                self.persist_relay_addr(&address, local_peer_id);
            }
            _ => {}
        }
    }

    fn handle_frame(&mut self, source: Option<PeerId>, topic: &TopicHash, data: &[u8]) {
        let Some(joined) = self.joined.as_ref().filter(|joined| joined.topic.hash() == *topic)
        else {
            return;
        };

        let envelope = match serde_json::from_slice::<Envelope>(data) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("Dropping malformed frame in {}: {err}", joined.identity.room);
                return;
            }
        };

        for event in apply_frame(joined, &mut self.roster, source, envelope.frame) {
            emit(&self.event_sender, event);
        }
    }

    fn joined_on(&self, topic: &TopicHash) -> Option<&JoinedRoom> {
        self.joined
            .as_ref()
            .filter(|joined| joined.topic.hash() == *topic)
    }

    fn drop_member(&mut self, peer_id: &PeerId) {
        if self.roster.remove(peer_id) {
            self.emit_roster();
        }
    }

    fn emit_roster(&self) {
        let Some(joined) = &self.joined else {
            return;
        };
        self.emit(HubEvent::ConnectedUser(
            self.roster.users(&joined.identity.user),
        ));
    }

    fn emit(&self, event: HubEvent) {
        emit(&self.event_sender, event);
    }

    fn persist_relay_addr(&mut self, address: &Multiaddr, local_peer_id: PeerId) {
        if self.persisted_addr || self.relay_topic.is_none() {
            return;
        }
        let Some(path) = self.config.config_path.clone() else {
            return;
        };
        if is_loopback(address) {
            return;
        }
        let entry = address.clone().with(Protocol::P2p(local_peer_id));
        config::persist_bootstrap_node(&path, &entry.to_string());
        self.persisted_addr = true;
    }
}

fn emit(sender: &broadcast::Sender<HubEvent>, event: HubEvent) {
    if sender.send(event).is_err() {
        log::debug!("No listeners for hub events");
    }
}

/// Publishes `frame` on `topic`. With nobody else subscribed the frame stays
/// local, which is not an error.
fn publish_frame(
    topic: &IdentTopic,
    frame: Frame,
    swarm: &mut Swarm<HubBehavior>,
) -> Result<(), ChatError> {
    let hash = topic.hash();
    let has_peers = swarm
        .behaviour()
        .gossipsub
        .all_peers()
        .any(|(_, topics)| topics.contains(&&hash));
    if !has_peers {
        log::debug!("No peers on {hash}, frame kept local");
        return Ok(());
    }

    let payload = serde_json::to_vec(&Envelope::new(frame))?;
    swarm
        .behaviour_mut()
        .gossipsub
        .publish(topic.clone(), payload)
        .map(|_| ())
        .map_err(|err| ChatError::Transport(format!("publish failed: {err:?}")))
}

fn is_loopback(address: &Multiaddr) -> bool {
    address.iter().any(|protocol| match protocol {
        Protocol::Ip4(ip) => ip.is_loopback() || ip.is_unspecified(),
        Protocol::Ip6(ip) => ip.is_loopback() || ip.is_unspecified(),
        _ => false,
    })
}
