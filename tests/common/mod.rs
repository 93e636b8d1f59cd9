//! Integration test infrastructure.
//!
//! Builds multi-node networks over in-memory duplex transports, drives
//! quiescence with version monitors (for links and splits) and the sync
//! barrier (for ordinary traffic), and asserts through state
//! inspection.
//!
//! Each integration test binary compiles this module separately and
//! uses a different slice of it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gossamer::{
    ChannelId, ClientId, ClientSpec, EventHandler, MemberModeDelta, Membership, ModeDelta, Node,
    NodeConfig, NodeHandle,
};
use tokio::sync::mpsc;

/// A network of test nodes. After a split, the nodes on the far side
/// move into their own `TestNet`.
pub struct TestNet {
    pub root: String,
    nodes: HashMap<String, NodeHandle>,
}

/// A client attached to one test node.
#[derive(Clone)]
pub struct TestClient {
    pub nick: String,
    pub lnick: String,
    /// Name of the server the client was attached to.
    pub home: String,
    pub id: ClientId,
}

/// Collects handler callbacks as strings for assertions.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl EventHandler for RecordingHandler {
    fn on_private_message(&self, from: &gossamer::Client, to: &gossamer::Client, message: &str) {
        self.push(format!("pm {} -> {}: {}", from.nick, to.nick, message));
    }

    fn on_channel_message(&self, from: &gossamer::Client, to: &gossamer::Channel, message: &str) {
        self.push(format!("cm {} -> {}: {}", from.nick, to.name, message));
    }

    fn on_channel_join(
        &self,
        channel: &gossamer::Channel,
        client: &gossamer::Client,
        _membership: &Membership,
    ) {
        self.push(format!("join {} {}", channel.name, client.nick));
    }
}

fn config(name: &str) -> NodeConfig {
    NodeConfig::new(name, "Test Server", "TestNet", "test")
}

impl TestNet {
    pub fn new(root: &str) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            root.to_string(),
            Node::spawn(config(root), None).expect("valid config"),
        );
        Self {
            root: root.to_string(),
            nodes,
        }
    }

    /// Spawn a node that is not yet linked to anything.
    pub fn add_server(&mut self, name: &str) {
        self.nodes.insert(
            name.to_string(),
            Node::spawn(config(name), None).expect("valid config"),
        );
    }

    /// Spawn a node with an event handler installed.
    pub fn add_server_with_handler(&mut self, name: &str, handler: RecordingHandler) {
        self.nodes.insert(
            name.to_string(),
            Node::spawn(config(name), Some(Box::new(handler))).expect("valid config"),
        );
    }

    pub fn handle(&self, name: &str) -> &NodeHandle {
        self.nodes
            .get(name)
            .unwrap_or_else(|| panic!("no such test server: {name}"))
    }

    /// Link two nodes over an in-memory duplex pair and wait until
    /// every node in the net has processed the resulting burst.
    pub async fn link(&mut self, from: &str, to: &str) {
        if !self.nodes.contains_key(to) {
            self.add_server(to);
        }

        let monitors = self.install_version_monitors().await;

        let (near, far) = tokio::io::duplex(1 << 20);
        let (near_r, near_w) = tokio::io::split(near);
        let (far_r, far_w) = tokio::io::split(far);
        self.handle(from)
            .begin_link(near_r, near_w, format!("new({from} -> {to})"))
            .await
            .expect("begin link");
        self.handle(to)
            .begin_link(far_r, far_w, format!("new({to} -> {from})"))
            .await
            .expect("begin link");

        self.await_version_monitors(monitors).await;
    }

    /// Attach a client with an explicit creation timestamp (seconds
    /// since the epoch) and wait for it to propagate.
    pub async fn new_client_ts(&self, server: &str, nick: &str, ts: i64) -> TestClient {
        use chrono::TimeZone;
        let ts = chrono::Utc.timestamp_opt(ts, 0).unwrap();
        self.attach(server, nick, Some(ts)).await
    }

    pub async fn new_client(&self, server: &str, nick: &str) -> TestClient {
        self.attach(server, nick, None).await
    }

    async fn attach(
        &self,
        server: &str,
        nick: &str,
        ts: Option<chrono::DateTime<chrono::Utc>>,
    ) -> TestClient {
        let id = self
            .handle(server)
            .attach_client(ClientSpec {
                subnet: "test".into(),
                nick: nick.into(),
                ident: nick.into(),
                host: format!("host.{nick}"),
                gecos: nick.into(),
                ts,
                ..Default::default()
            })
            .await
            .expect("attach client");
        self.sync_from(server).await;
        TestClient {
            nick: nick.to_string(),
            lnick: nick.to_lowercase(),
            home: server.to_string(),
            id,
        }
    }

    /// Barrier from the root: resolves once every node has drained the
    /// root's prior traffic.
    pub async fn sync(&self) {
        self.sync_from(&self.root.clone()).await;
    }

    pub async fn sync_from(&self, server: &str) {
        let done = self.handle(server).sync().await.expect("sync request");
        done.await.expect("sync completion");
    }

    /// Sever the link between `target` and its hub, wait for both sides
    /// to settle, and move the far subtree into its own net.
    pub async fn split(&mut self, target: &str) -> TestNet {
        assert_ne!(target, self.root, "cannot split the root server");

        let target_name = target.to_string();
        let (hub, moved) = self
            .handle(&self.root.clone())
            .inspect(move |state| {
                let hub = state.network[&target_name]
                    .hub
                    .clone()
                    .expect("split target has a hub");
                // The whole subtree behind the target goes with it.
                let mut moved = vec![target_name.clone()];
                let mut cursor = 0;
                while cursor < moved.len() {
                    let children = state.network[&moved[cursor]].links.clone();
                    moved.extend(children);
                    cursor += 1;
                }
                (hub, moved)
            })
            .await
            .expect("inspect root");

        let monitors = self.install_version_monitors().await;
        self.handle(&hub)
            .disconnect_server(target)
            .await
            .expect("disconnect");
        self.await_version_monitors(monitors).await;

        let mut far = TestNet {
            root: target.to_string(),
            nodes: HashMap::new(),
        };
        for name in moved {
            if let Some(handle) = self.nodes.remove(&name) {
                far.nodes.insert(name, handle);
            }
        }

        self.sync().await;
        far.sync().await;
        far
    }

    /// Take over another net's nodes, e.g. to relink a split subtree.
    pub fn absorb(&mut self, other: TestNet) {
        self.nodes.extend(other.nodes);
    }

    pub async fn shutdown(&self) {
        for handle in self.nodes.values() {
            let _ = handle.shutdown().await;
        }
    }

    async fn install_version_monitors(&self) -> Vec<(String, mpsc::Receiver<u64>)> {
        let mut monitors = Vec::new();
        for (name, handle) in &self.nodes {
            let (tx, rx) = mpsc::channel(16);
            handle
                .set_version_monitor(Some(tx))
                .await
                .expect("install monitor");
            monitors.push((name.clone(), rx));
        }
        monitors
    }

    async fn await_version_monitors(&self, monitors: Vec<(String, mpsc::Receiver<u64>)>) {
        for (name, mut rx) in monitors {
            rx.recv()
                .await
                .unwrap_or_else(|| panic!("{name}: no version bump"));
            self.handle(&name)
                .set_version_monitor(None)
                .await
                .expect("clear monitor");
        }
    }

    // ------------------------------------------------------------------
    // Channel operations
    // ------------------------------------------------------------------

    /// Join (or create) a channel from the client's home node and wait
    /// for propagation.
    pub async fn join(&self, client: &TestClient, channel: &str) -> ChannelId {
        let id = self
            .handle(&client.home)
            .join_or_create_channel(&client.id, "test", channel)
            .await
            .expect("join channel");
        self.sync_from(&client.home).await;
        id
    }

    /// Apply a member mode string (`+v`, `-q+v`, ...) as `actor`, with
    /// one target client per mode letter, then wait for propagation.
    pub async fn set_member_modes(
        &self,
        actor: &TestClient,
        channel: &ChannelId,
        modes: &str,
        targets: &[&TestClient],
    ) {
        let mut operation = ModeDelta::Unchanged;
        let mut member_deltas: Vec<MemberModeDelta> = Vec::new();
        let mut targets = targets.iter();

        for letter in modes.chars() {
            match letter {
                '+' => operation = ModeDelta::Added,
                '-' => operation = ModeDelta::Removed,
                'q' | 'a' | 'o' | 'h' | 'v' => {
                    let target = targets.next().expect("missing mode argument");
                    let id = self
                        .resolve(&actor.home, &target.lnick)
                        .await
                        .expect("mode target exists");
                    let delta = match member_deltas.iter_mut().find(|d| d.client == id) {
                        Some(delta) => delta,
                        None => {
                            member_deltas.push(MemberModeDelta::new(id));
                            member_deltas.last_mut().unwrap()
                        }
                    };
                    match letter {
                        'q' => delta.is_owner = operation,
                        'a' => delta.is_admin = operation,
                        'o' => delta.is_op = operation,
                        'h' => delta.is_halfop = operation,
                        'v' => delta.is_voice = operation,
                        _ => unreachable!(),
                    }
                }
                other => panic!("unsupported mode letter in test: {other}"),
            }
        }

        self.handle(&actor.home)
            .change_channel_mode(&actor.id, channel, Default::default(), member_deltas)
            .await
            .expect("change mode");
        self.sync_from(&actor.home).await;
    }

    /// A client's current wire identity as seen by one node.
    async fn resolve(&self, on: &str, lnick: &str) -> Option<ClientId> {
        let lnick = lnick.to_string();
        self.handle(on)
            .inspect(move |state| {
                state.subnets["test"]
                    .clients
                    .get(&lnick)
                    .map(|client| client.id())
            })
            .await
            .expect("inspect")
    }

    // ------------------------------------------------------------------
    // Assertions
    // ------------------------------------------------------------------

    pub async fn client_exists_on(&self, node: &str, client: &TestClient) -> bool {
        let (lnick, home) = (client.lnick.clone(), client.home.clone());
        self.handle(node)
            .inspect(move |state| {
                state.subnets["test"]
                    .clients
                    .get(&lnick)
                    .is_some_and(|found| found.server == home)
            })
            .await
            .expect("inspect")
    }

    /// Assert the client's presence (or absence) on every node of this
    /// net.
    pub async fn expect_client_everywhere(&self, client: &TestClient, expect: bool) {
        for node in self.nodes.keys() {
            assert_eq!(
                self.client_exists_on(node, client).await,
                expect,
                "{node}: client {} (homed on {}) expected exists={expect}",
                client.nick,
                client.home,
            );
        }
    }

    /// Whether `on` sees `target` as one of its own direct links.
    pub async fn is_linked(&self, on: &str, target: &str) -> bool {
        let target = target.to_string();
        self.handle(on)
            .inspect(move |state| state.me().links.contains(&target))
            .await
            .expect("inspect")
    }

    pub async fn server_exists(&self, on: &str, target: &str) -> bool {
        let target = target.to_string();
        self.handle(on)
            .inspect(move |state| state.network.contains_key(&target))
            .await
            .expect("inspect")
    }

    pub async fn expect_server_everywhere(&self, target: &str, expect: bool) {
        for node in self.nodes.keys() {
            assert_eq!(
                self.server_exists(node, target).await,
                expect,
                "{node}: server {target} expected exists={expect}",
            );
        }
    }

    /// A member's flags on one node; `None` when the node lacks the
    /// channel or the membership.
    pub async fn membership_on(
        &self,
        node: &str,
        channel: &str,
        client: &TestClient,
    ) -> Option<Membership> {
        let (lname, lnick) = (channel.to_lowercase(), client.lnick.clone());
        self.handle(node)
            .inspect(move |state| {
                state.subnets["test"]
                    .channels
                    .get(&lname)?
                    .members
                    .get(&lnick)
                    .cloned()
            })
            .await
            .expect("inspect")
    }

    /// Assert a member-flag predicate on every node of this net.
    pub async fn expect_membership_everywhere(
        &self,
        channel: &str,
        client: &TestClient,
        check: impl Fn(&Membership) -> bool,
        description: &str,
    ) {
        for node in self.nodes.keys() {
            let membership = self.membership_on(node, channel, client).await;
            let membership = membership.unwrap_or_else(|| {
                panic!("{node}: {} is not a member of {channel}", client.nick)
            });
            assert!(
                check(&membership),
                "{node}: {} in {channel}: expected {description}, got {membership:?}",
                client.nick,
            );
        }
    }

    /// Assert the expected direct-link structure: every `(server,
    /// neighbor)` pair must appear in the server's own link set.
    pub async fn expect_structure(&self, structure: &[(&str, &[&str])]) {
        for (server, neighbors) in structure {
            for neighbor in *neighbors {
                assert!(
                    self.is_linked(server, neighbor).await,
                    "{server}: expected a direct link to {neighbor}",
                );
            }
        }
    }
}
