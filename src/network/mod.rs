pub mod behavior;
pub mod client;
pub mod room;
pub mod transport;

use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::common::{HubCommand, HubEvent};
use crate::error::ChatError;

pub use client::{HubClient, HubConfig, HubHandle};

/// The realtime connection a chat session talks through.
pub trait HubTransport: Send + Sync + 'static {
    /// Invokes a hub method. The future resolves once the hub accepted or
    /// rejected it.
    fn send(&self, command: HubCommand) -> BoxFuture<'static, Result<(), ChatError>>;

    /// A fresh stream of inbound events, starting from now.
    fn subscribe(&self) -> broadcast::Receiver<HubEvent>;
}
