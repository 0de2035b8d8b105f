use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use kumas_types::events::GatewayEvent;
use kumas_types::models::{ChatId, UserId};

use crate::registry::{ConnectionId, ConnectionRegistry, Registration};

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("connection {0} is not live")]
    UnknownConnection(ConnectionId),
    #[error("connection {0} closed its outbox")]
    Closed(ConnectionId),
}

/// What a fan-out did. Informational only; delivery failures are never
/// surfaced as errors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Owns the connection registry plus one outbound queue per live connection,
/// and pushes events to connected users.
///
/// Cheap to clone; construct once at startup and hand a clone to every
/// request handler and connection task.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    registry: ConnectionRegistry,

    /// Per-connection send queues: conn_id -> sender
    outboxes: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<GatewayEvent>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Open a new live connection for `user_id`. Returns its id and the
    /// receiving end of its outbound queue.
    pub fn attach(&self, user_id: UserId) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        // Outbox first, so a registered connection always has somewhere to push.
        self.inner
            .outboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn_id, tx);

        if let Registration::Added(conns) = self.inner.registry.register(user_id, conn_id) {
            debug!("user {} now has {} live connection(s)", user_id, conns.len());
        }

        (conn_id, rx)
    }

    /// Tear down a live connection. Unknown ids are ignored.
    pub fn detach(&self, conn_id: ConnectionId) {
        let owner = self.inner.registry.unregister(conn_id);
        self.inner
            .outboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn_id);

        if let Some(user_id) = owner {
            debug!(
                "connection {} of user {} detached ({} left)",
                conn_id,
                user_id,
                self.inner.registry.connections_for(user_id).len()
            );
        }
    }

    /// Queue an event on one specific connection.
    pub fn push(&self, conn_id: ConnectionId, event: GatewayEvent) -> Result<(), PushError> {
        let outboxes = self.inner.outboxes.read().unwrap_or_else(PoisonError::into_inner);
        let tx = outboxes
            .get(&conn_id)
            .ok_or(PushError::UnknownConnection(conn_id))?;
        tx.send(event).map_err(|_| PushError::Closed(conn_id))
    }

    /// Push `event` to every live connection of `user_id`.
    pub fn send_to_user(&self, user_id: UserId, event: &GatewayEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for conn_id in self.inner.registry.connections_for(user_id) {
            match self.push(conn_id, event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    // Connection went away between lookup and push.
                    warn!("dropping event for user {}: {}", user_id, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Fan a chat event out to every live connection of every member,
    /// the author included. Must only be called once the change that
    /// produced `event` has been committed, and before the next commit to
    /// the same chat, so each connection sees events in commit order.
    pub fn deliver(&self, chat_id: ChatId, members: &[UserId], event: &GatewayEvent) -> DeliveryReport {
        let unique: BTreeSet<UserId> = members.iter().copied().collect();

        let mut report = DeliveryReport::default();
        for user_id in unique {
            let r = self.send_to_user(user_id, event);
            report.delivered += r.delivered;
            report.failed += r.failed;
        }

        trace!(
            "chat {} fan-out: {} delivered, {} failed",
            chat_id, report.delivered, report.failed
        );
        report
    }
}
