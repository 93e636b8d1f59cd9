//! The node's public face.
//!
//! All mutable state lives inside the event-loop task; a [`NodeHandle`]
//! submits tagged requests (or closures, for reads) through a bounded
//! channel and awaits the loop's reply. This keeps the single-writer
//! invariant without any locks around the state model.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::error::NodeError;
use crate::network::link::LinkSource;
use crate::network::sendq::SendSink;
use crate::node::NodeState;
use crate::state::{ChannelId, ChannelModeDelta, ClientId, MemberModeDelta};

/// Everything needed to create a locally-homed client. The owning
/// server is always the local node; a missing timestamp defaults to
/// now.
#[derive(Debug, Clone, Default)]
pub struct ClientSpec {
    pub subnet: String,
    pub nick: String,
    pub ident: String,
    pub vident: String,
    pub host: String,
    pub vhost: String,
    pub ip: String,
    pub vip: String,
    pub gecos: String,
    pub ts: Option<DateTime<Utc>>,
}

/// Everything needed to create an empty channel locally.
#[derive(Debug, Clone, Default)]
pub struct ChannelSpec {
    pub subnet: String,
    pub name: String,
    pub ts: Option<DateTime<Utc>>,
}

pub(crate) enum NodeRequest {
    BeginLink {
        reader: LinkSource,
        writer: SendSink,
        name: String,
        reply: oneshot::Sender<()>,
    },
    AttachClient {
        spec: ClientSpec,
        reply: oneshot::Sender<Result<ClientId, NodeError>>,
    },
    AttachChannel {
        spec: ChannelSpec,
        reply: oneshot::Sender<Result<ChannelId, NodeError>>,
    },
    JoinOrCreateChannel {
        client: ClientId,
        subnet: String,
        name: String,
        reply: oneshot::Sender<Result<ChannelId, NodeError>>,
    },
    PartChannel {
        channel: ChannelId,
        client: ClientId,
        reason: String,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    Quit {
        client: ClientId,
        reason: String,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    ChannelMessage {
        from: ClientId,
        channel: ChannelId,
        message: String,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    PrivateMessage {
        from: ClientId,
        to: ClientId,
        message: String,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    ChangeChannelMode {
        actor: ClientId,
        channel: ChannelId,
        delta: ChannelModeDelta,
        member_deltas: Vec<MemberModeDelta>,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    DisconnectServer {
        server: String,
        reply: oneshot::Sender<()>,
    },
    Sync {
        reply: oneshot::Sender<oneshot::Receiver<()>>,
    },
    Inspect(Box<dyn FnOnce(&NodeState) + Send>),
    SetVersionMonitor {
        monitor: Option<mpsc::Sender<u64>>,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    pub(crate) requests: mpsc::Sender<NodeRequest>,
}

impl NodeHandle {
    async fn submit<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> NodeRequest,
    ) -> Result<R, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .await
            .map_err(|_| NodeError::NodeClosed)?;
        rx.await.map_err(|_| NodeError::NodeClosed)
    }

    /// Adopt a fresh byte-stream pair as a new link and send HELLO. The
    /// handshake completes asynchronously; `on_server_link` fires once
    /// the peer introduces itself.
    pub async fn begin_link(
        &self,
        reader: impl tokio::io::AsyncRead + Send + Unpin + 'static,
        writer: impl tokio::io::AsyncWrite + Send + Unpin + 'static,
        name: impl Into<String>,
    ) -> Result<(), NodeError> {
        let name = name.into();
        self.submit(|reply| NodeRequest::BeginLink {
            reader: Box::new(reader),
            writer: Box::new(writer),
            name,
            reply,
        })
        .await
    }

    /// Create a locally-homed client and announce it to the network.
    pub async fn attach_client(&self, spec: ClientSpec) -> Result<ClientId, NodeError> {
        self.submit(|reply| NodeRequest::AttachClient { spec, reply })
            .await?
    }

    /// Create an empty channel and announce it to the network.
    pub async fn attach_channel(&self, spec: ChannelSpec) -> Result<ChannelId, NodeError> {
        self.submit(|reply| NodeRequest::AttachChannel { spec, reply })
            .await?
    }

    /// Join an existing channel, or create it with the client as owner.
    pub async fn join_or_create_channel(
        &self,
        client: &ClientId,
        subnet: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<ChannelId, NodeError> {
        let (client, subnet, name) = (client.clone(), subnet.into(), name.into());
        self.submit(|reply| NodeRequest::JoinOrCreateChannel {
            client,
            subnet,
            name,
            reply,
        })
        .await?
    }

    /// Remove a locally-homed member from a channel.
    pub async fn part_channel(
        &self,
        channel: &ChannelId,
        client: &ClientId,
        reason: impl Into<String>,
    ) -> Result<(), NodeError> {
        let (channel, client, reason) = (channel.clone(), client.clone(), reason.into());
        self.submit(|reply| NodeRequest::PartChannel {
            channel,
            client,
            reason,
            reply,
        })
        .await?
    }

    /// Remove a locally-homed client from the network.
    pub async fn quit(
        &self,
        client: &ClientId,
        reason: impl Into<String>,
    ) -> Result<(), NodeError> {
        let (client, reason) = (client.clone(), reason.into());
        self.submit(|reply| NodeRequest::Quit {
            client,
            reason,
            reply,
        })
        .await?
    }

    /// Deliver text to a channel, locally and network-wide.
    pub async fn channel_message(
        &self,
        from: &ClientId,
        channel: &ChannelId,
        message: impl Into<String>,
    ) -> Result<(), NodeError> {
        let (from, channel, message) = (from.clone(), channel.clone(), message.into());
        self.submit(|reply| NodeRequest::ChannelMessage {
            from,
            channel,
            message,
            reply,
        })
        .await?
    }

    /// Deliver text to a single client, routed along the tree when the
    /// target is remote.
    pub async fn private_message(
        &self,
        from: &ClientId,
        to: &ClientId,
        message: impl Into<String>,
    ) -> Result<(), NodeError> {
        let (from, to, message) = (from.clone(), to.clone(), message.into());
        self.submit(|reply| NodeRequest::PrivateMessage {
            from,
            to,
            message,
            reply,
        })
        .await?
    }

    /// Apply a mode change on behalf of `actor`, filtered by the
    /// actor's own channel privileges.
    pub async fn change_channel_mode(
        &self,
        actor: &ClientId,
        channel: &ChannelId,
        delta: ChannelModeDelta,
        member_deltas: Vec<MemberModeDelta>,
    ) -> Result<(), NodeError> {
        let (actor, channel) = (actor.clone(), channel.clone());
        self.submit(|reply| NodeRequest::ChangeChannelMode {
            actor,
            channel,
            delta,
            member_deltas,
            reply,
        })
        .await?
    }

    /// Force-drop the direct link to a named peer server, as if its
    /// transport had failed. No-op when the server is not directly
    /// linked.
    pub async fn disconnect_server(&self, server: impl Into<String>) -> Result<(), NodeError> {
        let server = server.into();
        self.submit(|reply| NodeRequest::DisconnectServer { server, reply })
            .await
    }

    /// Start a sync barrier. The returned receiver resolves once every
    /// node known at request time has processed all prior traffic from
    /// this node. A server lost mid-sync never replies; observe split
    /// events alongside this.
    pub async fn sync(&self) -> Result<oneshot::Receiver<()>, NodeError> {
        self.submit(|reply| NodeRequest::Sync { reply }).await
    }

    /// Run a read-only closure against the node's state, on the
    /// event-loop task.
    pub async fn inspect<F, R>(&self, f: F) -> Result<R, NodeError>
    where
        F: FnOnce(&NodeState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(NodeRequest::Inspect(Box::new(move |state| {
                let _ = tx.send(f(state));
            })))
            .await
            .map_err(|_| NodeError::NodeClosed)?;
        rx.await.map_err(|_| NodeError::NodeClosed)
    }

    /// Install or clear the version monitor (test instrumentation).
    /// The monitor must keep up: a full channel at bump time is a
    /// programmer error.
    pub async fn set_version_monitor(
        &self,
        monitor: Option<mpsc::Sender<u64>>,
    ) -> Result<(), NodeError> {
        self.submit(|reply| NodeRequest::SetVersionMonitor { monitor, reply })
            .await
    }

    /// Drain and stop the node: local links are flushed, pre-handshake
    /// links closed, then the event loop exits.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        self.submit(|reply| NodeRequest::Shutdown { reply }).await
    }
}
