//! Client records.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wire;

/// Wire identity of a client.
///
/// Includes the owning server so that a stale identity (left over from
/// a collision kill or a split) never resolves to a different client
/// that has since taken the same nickname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId {
    pub server: String,
    pub subnet: String,
    /// Lowercase nickname.
    pub nick: String,
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.subnet, self.nick, self.server)
    }
}

/// A client somewhere on the network.
#[derive(Debug, Clone)]
pub struct Client {
    /// Name of the subnet this client lives in.
    pub subnet: String,
    /// Name of the server this client is homed on.
    pub server: String,
    pub nick: String,
    /// Lowercase nickname; unique within the subnet.
    pub lnick: String,
    pub ident: String,
    pub vident: String,
    pub host: String,
    pub vhost: String,
    pub ip: String,
    pub vip: String,
    pub gecos: String,
    /// Creation timestamp, UTC. Collision arbitration compares these.
    pub ts: DateTime<Utc>,
    /// Lowercase names of the channels this client is a member of, in
    /// its own subnet. Reverse index used to destroy memberships when
    /// the client goes away.
    pub channels: HashSet<String>,
}

impl Client {
    pub fn id(&self) -> ClientId {
        ClientId {
            server: self.server.clone(),
            subnet: self.subnet.clone(),
            nick: self.lnick.clone(),
        }
    }

    /// Whether this client is homed on `server_name`'s node.
    pub fn is_on(&self, server_name: &str) -> bool {
        self.server == server_name
    }

    pub(crate) fn announce(&self) -> wire::ClientAnnounce {
        wire::ClientAnnounce {
            subnet: self.subnet.clone(),
            server: self.server.clone(),
            nick: self.nick.clone(),
            ident: self.ident.clone(),
            vident: self.vident.clone(),
            host: self.host.clone(),
            vhost: self.vhost.clone(),
            ip: self.ip.clone(),
            vip: self.vip.clone(),
            gecos: self.gecos.clone(),
            ts: self.ts,
        }
    }

    pub(crate) fn from_announce(msg: &wire::ClientAnnounce) -> Self {
        Self {
            subnet: msg.subnet.clone(),
            server: msg.server.clone(),
            lnick: msg.nick.to_lowercase(),
            nick: msg.nick.clone(),
            ident: msg.ident.clone(),
            vident: msg.vident.clone(),
            host: msg.host.clone(),
            vhost: msg.vhost.clone(),
            ip: msg.ip.clone(),
            vip: msg.vip.clone(),
            gecos: msg.gecos.clone(),
            ts: msg.ts,
            channels: HashSet::new(),
        }
    }
}
