use std::collections::hash_map::DefaultHasher;
use std::error::Error;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use libp2p::gossipsub::{self, IdentTopic};
use libp2p::mdns;
use libp2p::swarm::NetworkBehaviour;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::{PeerId, identity};

#[derive(NetworkBehaviour)]
pub struct HubBehavior {
    pub gossipsub: gossipsub::Behaviour,
    /// Off when LAN discovery is disabled in the config.
    pub mdns: Toggle<mdns::tokio::Behaviour>,
}

/// Gossipsub topic carrying one chat room.
pub fn room_topic(prefix: &str, room: &str) -> IdentTopic {
    IdentTopic::new(format!("{prefix}/{}", room.trim().to_lowercase()))
}

/// Id gossipsub deduplicates on. Frames carry a nonce, so the same payload
/// in the same room is a genuine duplicate; the same payload in another room
/// is not.
pub fn room_message_id(message: &gossipsub::Message) -> gossipsub::MessageId {
    let mut hasher = DefaultHasher::new();
    message.topic.hash(&mut hasher);
    message.data.hash(&mut hasher);
    gossipsub::MessageId::from(format!("{}:{:016x}", message.topic, hasher.finish()))
}

/// Topics are subscribed per room on join, not here.
pub fn build_behavior(
    local_key: &identity::Keypair,
    local_peer_id: PeerId,
    enable_mdns: bool,
) -> Result<HubBehavior, Box<dyn Error>> {

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(Duration::from_secs(5))
        .validation_mode(gossipsub::ValidationMode::Strict)
        .message_id_fn(room_message_id)
        .build()?;

    let gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(local_key.clone()),
        gossipsub_config,
    )?;

    let mdns = if enable_mdns {
        Some(mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?)
    } else {
        None
    };

    Ok(HubBehavior {
        gossipsub,
        mdns: Toggle::from(mdns),
    })
}
