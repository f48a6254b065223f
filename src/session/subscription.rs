use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::common::{HubEvent, HubEventKind};
use crate::network::HubTransport;

/// Handle to a listener registered with [`on`]. Dropping it cancels the
/// listener.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Runs `handler` for every inbound event of `kind` until the returned
/// handle is cancelled or the transport closes its event stream.
pub fn on<T, F>(transport: &T, kind: HubEventKind, mut handler: F) -> Subscription
where
    T: HubTransport + ?Sized,
    F: FnMut(HubEvent) + Send + 'static,
{
    let mut events = transport.subscribe();
    let task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.kind() == kind => handler(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("{kind:?} listener lagged, {skipped} event(s) dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        log::debug!("{kind:?} listener stopped");
    });

    Subscription { task }
}
