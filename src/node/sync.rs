//! The sync barrier.
//!
//! Once a sync completes, every node known at request time has
//! processed every message this node sent before the request. The
//! request floods the tree; every node replies toward the origin, and
//! the origin counts replies against the server set it knew when the
//! sync began.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::debug;

use crate::node::Node;
use crate::wire::{self, WireMessage};

pub(crate) struct SyncRecord {
    done: Option<oneshot::Sender<()>>,
    /// Reply-pending flag per server known at request time. Servers
    /// lost mid-sync never reply; the waiter observes that through
    /// split events, not through this record.
    servers: HashMap<String, bool>,
}

impl Node {
    /// Allocate a sequence id, record the pending server set and flood
    /// the request. The returned receiver resolves on completion —
    /// immediately, when no other server exists.
    pub(super) fn start_sync(&mut self) -> oneshot::Receiver<()> {
        self.sync_id += 1;
        let (done_tx, done_rx) = oneshot::channel();

        let mut servers = HashMap::new();
        for name in self.state.network.keys() {
            if *name != self.state.me {
                servers.insert(name.clone(), false);
            }
        }
        let nothing_to_await = servers.is_empty();
        debug!(me = %self.state.me, sequence = self.sync_id, pending = servers.len(), "sync started");

        self.syncs_active.insert(
            self.sync_id,
            SyncRecord {
                done: Some(done_tx),
                servers,
            },
        );

        self.send_all(&WireMessage::Sync(wire::Sync {
            sequence: self.sync_id,
            reply: false,
            origin: self.state.me.clone(),
            reply_from: String::new(),
        }));

        if nothing_to_await {
            if let Some(mut record) = self.syncs_active.remove(&self.sync_id) {
                if let Some(done) = record.done.take() {
                    let _ = done.send(());
                }
            }
        }
        done_rx
    }

    pub(super) fn handle_sync(&mut self, m: wire::Sync, from: &str) {
        if !m.reply {
            // Acknowledge back along the arrival link; from here the
            // reply is routed by its origin. Then keep flooding the
            // request.
            let reply = wire::Sync {
                sequence: m.sequence,
                reply: true,
                origin: m.origin.clone(),
                reply_from: self.state.me.clone(),
            };
            self.send_to_server(from, &WireMessage::Sync(reply));
            self.send_all_skip(&WireMessage::Sync(m), Some(from));
            return;
        }

        if m.origin != self.state.me {
            let Some(origin) = self.state.network.get(&m.origin) else {
                panic!("[{}] sync reply toward unknown origin {}", self.state.me, m.origin);
            };
            if origin.route.as_deref() == Some(from) {
                panic!("[{}] sync reply loop via {}", self.state.me, from);
            }
            let origin = m.origin.clone();
            self.send_to_server(&origin, &WireMessage::Sync(m));
            return;
        }

        let Some(record) = self.syncs_active.get_mut(&m.sequence) else {
            panic!("[{}] sync reply for unknown sequence {}", self.state.me, m.sequence);
        };
        record.servers.insert(m.reply_from.clone(), true);

        if record.servers.values().all(|done| *done) {
            debug!(me = %self.state.me, sequence = m.sequence, "sync complete");
            if let Some(mut record) = self.syncs_active.remove(&m.sequence) {
                if let Some(done) = record.done.take() {
                    let _ = done.send(());
                }
            }
        }
    }
}
