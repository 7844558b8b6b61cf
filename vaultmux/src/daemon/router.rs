//! Request routing and identifier virtualization.
//!
//! Outbound client requests are rewritten to a virtual identifier,
//! `"<client-id>#<seq>:<original-id>"`, and recorded in the pending table.
//! `seq` increases for every forwarded request, so a client reusing an id that
//! is still in flight gets a fresh virtual id. Upstream responses are matched
//! by virtual identifier, restored to the original identifier, and handed back
//! with the owning client. Responses nobody is waiting for are dropped.
//!
//! The original id is rendered as JSON text, so `1`, `"1"` and `null` from the
//! same client stay distinguishable. Client ids contain neither `#` nor `:`,
//! and `seq` is all digits, which keeps the mapping injective.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use vaultmux_core::{FramedMessage, JsonRpcId, JsonRpcMessageKind};

use super::registry::ClientId;

/// Bookkeeping for one request forwarded upstream and not yet answered.
#[derive(Debug, Clone)]
pub struct PendingRequestEntry {
    pub client: ClientId,
    pub original_id: JsonRpcId,
    pub method: String,
    pub sent_at: Instant,
}

/// Where an upstream message should go.
#[derive(Debug)]
pub enum InboundRoute {
    /// A response for a request `client` is waiting on; id already restored.
    Deliver {
        client: ClientId,
        message: FramedMessage,
        method: String,
        latency: std::time::Duration,
    },
    /// A server-initiated notification, for every connected client.
    Broadcast(FramedMessage),
    /// Nowhere to deliver.
    Drop {
        message: FramedMessage,
        reason: DropReason,
    },
}

/// Why an upstream message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No pending entry: the client disconnected or the id was never issued.
    Unroutable,
    /// The upstream sent a request; no client can be chosen to answer it.
    UpstreamRequest,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Unroutable => "unroutable_response",
            DropReason::UpstreamRequest => "upstream_request",
        }
    }
}

/// Compute the virtual identifier sent upstream for the `seq`-th forwarded
/// request, `original` from `client`.
pub fn virtual_id(client: ClientId, seq: u64, original: &JsonRpcId) -> JsonRpcId {
    JsonRpcId::String(format!("{client}#{seq}:{original}"))
}

/// Pending-request table plus a per-client index for disconnect cleanup.
#[derive(Debug, Default)]
pub struct Router {
    next_seq: u64,
    pending: HashMap<JsonRpcId, PendingRequestEntry>,
    by_client: HashMap<ClientId, HashSet<JsonRpcId>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare a client message for the upstream link.
    ///
    /// Requests are rewritten to their virtual id and recorded. Notifications
    /// and client responses pass through untouched.
    pub fn outbound(&mut self, client: ClientId, message: FramedMessage) -> FramedMessage {
        let JsonRpcMessageKind::Request { id, method } = message.kind() else {
            return message;
        };

        self.next_seq += 1;
        let virtual_id = virtual_id(client, self.next_seq, id);
        let entry = PendingRequestEntry {
            client,
            original_id: id.clone(),
            method: method.clone(),
            sent_at: Instant::now(),
        };

        self.pending.insert(virtual_id.clone(), entry);
        self.by_client
            .entry(client)
            .or_default()
            .insert(virtual_id.clone());

        message.with_id(virtual_id)
    }

    /// Decide where an upstream message goes, consuming its pending entry.
    pub fn inbound(&mut self, message: FramedMessage) -> InboundRoute {
        match message.kind() {
            JsonRpcMessageKind::Response { id } => {
                let Some(entry) = self.pending.remove(id) else {
                    return InboundRoute::Drop {
                        message,
                        reason: DropReason::Unroutable,
                    };
                };

                if let Some(ids) = self.by_client.get_mut(&entry.client) {
                    ids.remove(id);
                    if ids.is_empty() {
                        self.by_client.remove(&entry.client);
                    }
                }

                InboundRoute::Deliver {
                    client: entry.client,
                    message: message.with_id(entry.original_id),
                    method: entry.method,
                    latency: entry.sent_at.elapsed(),
                }
            }
            JsonRpcMessageKind::Notification { .. } => InboundRoute::Broadcast(message),
            JsonRpcMessageKind::Request { .. } => InboundRoute::Drop {
                message,
                reason: DropReason::UpstreamRequest,
            },
        }
    }

    /// Forget every request `client` has in flight. Returns how many were purged.
    pub fn purge_client(&mut self, client: ClientId) -> usize {
        let Some(ids) = self.by_client.remove(&client) else {
            return 0;
        };
        ids.iter()
            .filter(|id| self.pending.remove(*id).is_some())
            .count()
    }

    /// Requests in flight across all clients.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Requests in flight for one client.
    pub fn pending_for(&self, client: ClientId) -> usize {
        self.by_client.get(&client).map_or(0, HashSet::len)
    }
}
