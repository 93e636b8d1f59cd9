//! The replicated-state engine.
//!
//! Exactly one task runs [`Node::run`]; it owns every server, subnet,
//! client, channel, membership and link record, and mutates them
//! without locks. Inbound link events and API requests are multiplexed
//! through bounded channels. Handlers for each wire message kind live
//! in [`handlers`]; burst, split and sync machinery in their own
//! modules; local-origin operations in [`api`].

mod api;
mod burst;
mod handle;
mod handlers;
mod split;
mod sync;

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::ConfigError;
use crate::event::EventHandler;
use crate::network::link::{Link, LinkEvent};
use crate::network::LinkId;
use crate::state::{Channel, ChannelId, Client, ClientId, Server, Subnet};
use crate::wire::WireMessage;

pub use handle::{ChannelSpec, ClientSpec, NodeHandle};
pub(crate) use handle::NodeRequest;
pub(crate) use sync::SyncRecord;

/// The node's replicated view of the network. Exposed read-only to
/// [`NodeHandle::inspect`] closures.
pub struct NodeState {
    /// Name of the local server.
    pub me: String,
    /// Name of the network.
    pub net_name: String,
    /// Name of the default subnet.
    pub default_subnet: String,
    /// Every server in the network, including the local one.
    pub network: HashMap<String, Server>,
    /// Every subnet, keyed by name.
    pub subnets: HashMap<String, Subnet>,
    /// Monotonic counter, bumped on burst completion and splits.
    pub version: u64,
}

impl NodeState {
    /// The local server's record.
    pub fn me(&self) -> &Server {
        &self.network[&self.me]
    }

    /// Resolve a client by wire identity. The stored client's current
    /// server must match the identity's server; a stale identity left
    /// over from a collision or a split resolves to nothing.
    pub fn lookup_client(&self, id: &ClientId) -> Option<&Client> {
        let client = self.subnets.get(&id.subnet)?.clients.get(&id.nick)?;
        (client.server == id.server).then_some(client)
    }

    /// Resolve a channel by wire identity.
    pub fn lookup_channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.subnets
            .get(&id.subnet)?
            .channels
            .get(&id.name.to_lowercase())
    }
}

/// The engine. Constructed and consumed by [`Node::spawn`]; all further
/// interaction goes through the returned [`NodeHandle`].
pub struct Node {
    config: NodeConfig,
    state: NodeState,

    /// Every link ever adopted, including silenced ones awaiting task
    /// teardown.
    links: HashMap<LinkId, std::sync::Arc<Link>>,
    /// Handshaken links, mapped to their server's name.
    local: HashMap<LinkId, String>,
    /// Links awaiting their first HELLO.
    new_links: HashSet<LinkId>,
    next_link_id: LinkId,

    inbound_tx: mpsc::Sender<LinkEvent>,
    inbound: mpsc::Receiver<LinkEvent>,
    requests: mpsc::Receiver<NodeRequest>,

    handler: Option<Box<dyn EventHandler>>,
    version_mon: Option<mpsc::Sender<u64>>,

    sync_id: u32,
    syncs_active: HashMap<u32, SyncRecord>,
}

impl Node {
    /// Validate the configuration, spawn the event-loop task and return
    /// a handle to it. `handler` may be `None` to ignore all events.
    pub fn spawn(
        config: NodeConfig,
        handler: Option<Box<dyn EventHandler>>,
    ) -> Result<NodeHandle, ConfigError> {
        config.validate()?;

        let (request_tx, requests) = mpsc::channel(64);
        let (inbound_tx, inbound) = mpsc::channel(64);

        let me = Server::new_local(&config.server_name, &config.server_desc, None, None);
        let mut network = HashMap::new();
        network.insert(me.name.clone(), me);
        let mut subnets = HashMap::new();
        subnets.insert(
            config.default_subnet.clone(),
            Subnet::new(&config.default_subnet),
        );

        let node = Node {
            state: NodeState {
                me: config.server_name.clone(),
                net_name: config.net_name.clone(),
                default_subnet: config.default_subnet.clone(),
                network,
                subnets,
                version: 0,
            },
            config,
            links: HashMap::new(),
            local: HashMap::new(),
            new_links: HashSet::new(),
            next_link_id: 0,
            inbound_tx,
            inbound,
            requests,
            handler,
            version_mon: None,
            sync_id: 0,
            syncs_active: HashMap::new(),
        };

        tokio::spawn(node.run());
        Ok(NodeHandle {
            requests: request_tx,
        })
    }

    async fn run(mut self) {
        info!(me = %self.state.me, "node event loop starting");
        loop {
            tokio::select! {
                Some(event) = self.inbound.recv() => self.handle_link_event(event),
                request = self.requests.recv() => match request {
                    Some(NodeRequest::Shutdown { reply }) => {
                        self.begin_shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.handle_request(request),
                    None => {
                        // Every handle is gone; nothing can drive us.
                        self.begin_shutdown();
                        break;
                    }
                },
            }
        }

        // Unblock any link still trying to deliver, then let the tasks
        // wind down on their own.
        self.inbound.close();
        while self.inbound.recv().await.is_some() {}
        info!(me = %self.state.me, "node event loop stopped");
    }

    fn handle_request(&mut self, request: NodeRequest) {
        match request {
            NodeRequest::BeginLink {
                reader,
                writer,
                name,
                reply,
            } => {
                self.begin_link(reader, writer, name);
                let _ = reply.send(());
            }
            NodeRequest::AttachClient { spec, reply } => {
                let _ = reply.send(self.attach_client(spec));
            }
            NodeRequest::AttachChannel { spec, reply } => {
                let _ = reply.send(self.attach_channel(spec));
            }
            NodeRequest::JoinOrCreateChannel {
                client,
                subnet,
                name,
                reply,
            } => {
                let _ = reply.send(self.join_or_create_channel(&client, &subnet, &name));
            }
            NodeRequest::PartChannel {
                channel,
                client,
                reason,
                reply,
            } => {
                let _ = reply.send(self.part_channel(&channel, &client, &reason));
            }
            NodeRequest::Quit {
                client,
                reason,
                reply,
            } => {
                let _ = reply.send(self.quit(&client, &reason));
            }
            NodeRequest::ChannelMessage {
                from,
                channel,
                message,
                reply,
            } => {
                let _ = reply.send(self.channel_message(&from, &channel, &message));
            }
            NodeRequest::PrivateMessage {
                from,
                to,
                message,
                reply,
            } => {
                let _ = reply.send(self.private_message(&from, &to, &message));
            }
            NodeRequest::ChangeChannelMode {
                actor,
                channel,
                delta,
                member_deltas,
                reply,
            } => {
                let _ = reply.send(self.change_channel_mode(&actor, &channel, delta, member_deltas));
            }
            NodeRequest::DisconnectServer { server, reply } => {
                self.disconnect_server(&server);
                let _ = reply.send(());
            }
            NodeRequest::Sync { reply } => {
                let _ = reply.send(self.start_sync());
            }
            NodeRequest::Inspect(f) => f(&self.state),
            NodeRequest::SetVersionMonitor { monitor, reply } => {
                self.version_mon = monitor;
                let _ = reply.send(());
            }
            NodeRequest::Shutdown { .. } => unreachable!("handled by the run loop"),
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        let Some(link) = self.links.get(&event.link) else {
            panic!("[{}] event from a link that was never adopted", self.state.me);
        };
        let (silenced, link_name) = (link.silenced(), link.name());

        if silenced {
            debug!(me = %self.state.me, link = %link_name, "ignoring event from silenced link");
            return;
        }

        if self.new_links.contains(&event.link) {
            self.handle_new_link_event(event);
            return;
        }

        let Some(server) = self.local.get(&event.link).cloned() else {
            panic!(
                "[{}] expected a server for link {{{}}}: {:?}",
                self.state.me, link_name, event.err
            );
        };

        if let Some(err) = event.err {
            warn!(me = %self.state.me, server = %server, error = %err, "link error");
            self.split(event.link, &err.to_string());
            return;
        }

        if let Some(msg) = event.msg {
            self.handle_link_message(msg, &server);
        }
    }

    /// Increment the topology version and feed the optional monitor.
    /// The monitor must accept the value without blocking.
    fn bump_version(&mut self) {
        self.state.version += 1;
        if let Some(mon) = &self.version_mon {
            match mon.try_send(self.state.version) {
                Ok(()) => debug!(me = %self.state.me, version = self.state.version, "bumped version"),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    panic!("[{}] version monitor cannot keep up", self.state.me)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.version_mon = None;
                }
            }
        }
    }

    /// Remove a client and all of its memberships from its subnet.
    fn process_quit(&mut self, subnet: &str, lnick: &str) -> Option<Client> {
        self.state.subnets.get_mut(subnet)?.remove_client(lnick)
    }

    // ------------------------------------------------------------------
    // Outbound plumbing. These take `&self`; callers must not hold
    // mutable borrows into the state when transmitting.
    // ------------------------------------------------------------------

    fn send_to_link(&self, link_id: LinkId, msg: &WireMessage) {
        let Some(link) = self.links.get(&link_id) else {
            panic!("[{}] send on unknown link", self.state.me);
        };
        debug!(me = %self.state.me, link = %link.name(), msg = %msg.kind(), "send");
        if let Err(err) = link.write_message(msg) {
            panic!(
                "[{}] failed to encode {} for link {{{}}}: {}",
                self.state.me,
                msg.kind(),
                link.name(),
                err
            );
        }
    }

    /// Transmit toward a server along its route.
    fn send_to_server(&self, name: &str, msg: &WireMessage) {
        let Some(server) = self.state.network.get(name) else {
            panic!("[{}] send to unknown server {}", self.state.me, name);
        };
        let Some(route) = server.route.as_deref() else {
            panic!("[{}] no route toward {}", self.state.me, name);
        };
        let link = self
            .state
            .network
            .get(route)
            .and_then(|route_server| route_server.link)
            .unwrap_or_else(|| {
                panic!("[{}] route {} toward {} has no link", self.state.me, route, name)
            });
        self.send_to_link(link, msg);
    }

    /// Transmit to every directly-linked neighbor.
    fn send_all(&self, msg: &WireMessage) {
        self.send_all_skip(msg, None);
    }

    /// Transmit to every directly-linked neighbor except `skip`. Tree
    /// flooding with the arrival neighbor skipped yields exactly-once
    /// delivery.
    fn send_all_skip(&self, msg: &WireMessage, skip: Option<&str>) {
        for (link_id, server) in &self.local {
            if skip != Some(server.as_str()) {
                self.send_to_link(*link_id, msg);
            }
        }
    }

    fn fire<F: FnOnce(&dyn EventHandler)>(&self, f: F) {
        if let Some(handler) = self.handler.as_deref() {
            f(handler);
        }
    }
}
