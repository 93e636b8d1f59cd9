//! Channel state and membership.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::client::ClientId;
use crate::state::mode::{ChannelModeDelta, MemberModeDelta, ModeDelta};
use crate::wire;

/// Wire identity of a channel: subnet plus display name. Lookups
/// normalise the name to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub subnet: String,
    pub name: String,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.subnet, self.name)
    }
}

/// Current mode flags of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelModes {
    pub topic_protected: bool,
    pub no_external_messages: bool,
    pub moderated: bool,
    pub secret: bool,
    /// Member limit; zero means unlimited.
    pub limit: u32,
    /// Join key; empty means none.
    pub key: String,
}

/// One client's standing in one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub ts: DateTime<Utc>,
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_op: bool,
    pub is_halfop: bool,
    pub is_voice: bool,
}

impl Membership {
    pub fn new(ts: DateTime<Utc>) -> Self {
        Self {
            ts,
            is_owner: false,
            is_admin: false,
            is_op: false,
            is_halfop: false,
            is_voice: false,
        }
    }

    pub fn has_any_privilege(&self) -> bool {
        self.is_owner || self.is_admin || self.is_op || self.is_halfop || self.is_voice
    }

    pub(crate) fn announce(&self, channel: &ChannelId, client: &ClientId) -> wire::MembershipAnnounce {
        wire::MembershipAnnounce {
            client: client.clone(),
            channel: channel.clone(),
            ts: self.ts,
            is_owner: self.is_owner,
            is_admin: self.is_admin,
            is_op: self.is_op,
            is_halfop: self.is_halfop,
            is_voice: self.is_voice,
        }
    }
}

/// A channel: mode flags plus a member map keyed by lowercase nick.
///
/// `local_members` is the subset of `members` homed on this node; it is
/// maintained by the node loop and always a subset of `members`.
#[derive(Debug, Clone)]
pub struct Channel {
    pub subnet: String,
    pub name: String,
    pub lname: String,
    pub ts: DateTime<Utc>,
    pub topic: String,
    pub topic_ts: Option<DateTime<Utc>>,
    pub topic_by: String,
    pub modes: ChannelModes,
    pub members: HashMap<String, Membership>,
    pub local_members: HashSet<String>,
}

impl Channel {
    pub fn new(subnet: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            subnet: subnet.into(),
            lname: name.to_lowercase(),
            name,
            ts: Utc::now(),
            topic: String::new(),
            topic_ts: None,
            topic_by: String::new(),
            modes: ChannelModes::default(),
            members: HashMap::new(),
            local_members: HashSet::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        ChannelId {
            subnet: self.subnet.clone(),
            name: self.name.clone(),
        }
    }

    /// Apply a mode delta, flag by flag, skipping operations that would
    /// not change state. Member deltas whose target is not a member are
    /// skipped. Returns the deltas that actually took effect, so
    /// callers can suppress no-op notifications.
    pub fn apply_mode_delta(
        &mut self,
        delta: &ChannelModeDelta,
        member_deltas: &[MemberModeDelta],
    ) -> (ChannelModeDelta, Vec<MemberModeDelta>) {
        let mut out = ChannelModeDelta::default();

        apply_flag(&mut self.modes.moderated, delta.moderated, &mut out.moderated);
        apply_flag(
            &mut self.modes.no_external_messages,
            delta.no_external_messages,
            &mut out.no_external_messages,
        );
        apply_flag(&mut self.modes.secret, delta.secret, &mut out.secret);
        apply_flag(
            &mut self.modes.topic_protected,
            delta.topic_protected,
            &mut out.topic_protected,
        );

        match delta.limit {
            ModeDelta::Added if self.modes.limit != delta.limit_value => {
                self.modes.limit = delta.limit_value;
                out.limit = ModeDelta::Added;
                out.limit_value = delta.limit_value;
            }
            ModeDelta::Removed if self.modes.limit != 0 => {
                self.modes.limit = 0;
                out.limit = ModeDelta::Removed;
            }
            _ => {}
        }
        match delta.key {
            ModeDelta::Added if self.modes.key != delta.key_value => {
                self.modes.key = delta.key_value.clone();
                out.key = ModeDelta::Added;
                out.key_value = delta.key_value.clone();
            }
            ModeDelta::Removed if !self.modes.key.is_empty() => {
                self.modes.key.clear();
                out.key = ModeDelta::Removed;
            }
            _ => {}
        }

        let mut out_member = Vec::new();
        for member in member_deltas {
            let Some(membership) = self.members.get_mut(&member.client.nick) else {
                continue;
            };
            let mut applied = MemberModeDelta::new(member.client.clone());
            apply_flag(&mut membership.is_owner, member.is_owner, &mut applied.is_owner);
            apply_flag(&mut membership.is_admin, member.is_admin, &mut applied.is_admin);
            apply_flag(&mut membership.is_op, member.is_op, &mut applied.is_op);
            apply_flag(&mut membership.is_halfop, member.is_halfop, &mut applied.is_halfop);
            apply_flag(&mut membership.is_voice, member.is_voice, &mut applied.is_voice);

            if !applied.is_empty() {
                out_member.push(applied);
            }
        }

        (out, out_member)
    }

    /// Serialize the full channel state for the wire. Member identities
    /// are resolved through `client_id`, which maps a lowercase nick to
    /// the client's current wire identity; unresolvable members are
    /// omitted.
    pub(crate) fn announce(
        &self,
        mut client_id: impl FnMut(&str) -> Option<ClientId>,
    ) -> wire::ChannelAnnounce {
        let id = self.id();
        wire::ChannelAnnounce {
            name: self.name.clone(),
            subnet: self.subnet.clone(),
            ts: self.ts,
            members: self
                .members
                .iter()
                .filter_map(|(lnick, membership)| {
                    client_id(lnick).map(|cid| membership.announce(&id, &cid))
                })
                .collect(),
        }
    }
}

fn apply_flag(current: &mut bool, delta: ModeDelta, out: &mut ModeDelta) {
    match delta {
        ModeDelta::Added if !*current => {
            *current = true;
            *out = ModeDelta::Added;
        }
        ModeDelta::Removed if *current => {
            *current = false;
            *out = ModeDelta::Removed;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClientId;

    fn cid(nick: &str) -> ClientId {
        ClientId {
            server: "hub.a".into(),
            subnet: "test".into(),
            nick: nick.into(),
        }
    }

    #[test]
    fn apply_skips_noop_flags() {
        let mut channel = Channel::new("test", "room");
        channel.modes.moderated = true;

        let delta = ChannelModeDelta {
            moderated: ModeDelta::Added,
            secret: ModeDelta::Added,
            ..Default::default()
        };
        let (applied, members) = channel.apply_mode_delta(&delta, &[]);
        assert_eq!(applied.moderated, ModeDelta::Unchanged);
        assert_eq!(applied.secret, ModeDelta::Added);
        assert!(members.is_empty());
        assert!(channel.modes.secret);
    }

    #[test]
    fn apply_is_idempotent() {
        let mut channel = Channel::new("test", "room");
        let target = cid("alpha");
        channel
            .members
            .insert(target.nick.clone(), Membership::new(Utc::now()));

        let delta = ChannelModeDelta {
            topic_protected: ModeDelta::Added,
            limit: ModeDelta::Added,
            limit_value: 25,
            ..Default::default()
        };
        let mut member = MemberModeDelta::new(target);
        member.is_voice = ModeDelta::Added;

        let (first, first_members) = channel.apply_mode_delta(&delta, &[member.clone()]);
        assert!(!first.is_empty());
        assert_eq!(first_members.len(), 1);

        let (second, second_members) = channel.apply_mode_delta(&delta, &[member]);
        assert!(second.is_empty());
        assert!(second_members.is_empty());
    }

    #[test]
    fn apply_skips_unknown_member() {
        let mut channel = Channel::new("test", "room");
        let mut member = MemberModeDelta::new(cid("ghost"));
        member.is_op = ModeDelta::Added;
        let (_, members) = channel.apply_mode_delta(&ChannelModeDelta::default(), &[member]);
        assert!(members.is_empty());
    }

    #[test]
    fn apply_key_and_limit_removal() {
        let mut channel = Channel::new("test", "room");
        channel.modes.limit = 10;
        channel.modes.key = "hunter2".into();

        let delta = ChannelModeDelta {
            limit: ModeDelta::Removed,
            key: ModeDelta::Removed,
            ..Default::default()
        };
        let (applied, _) = channel.apply_mode_delta(&delta, &[]);
        assert_eq!(applied.limit, ModeDelta::Removed);
        assert_eq!(applied.key, ModeDelta::Removed);
        assert_eq!(channel.modes.limit, 0);
        assert!(channel.modes.key.is_empty());

        let (again, _) = channel.apply_mode_delta(&delta, &[]);
        assert!(again.is_empty());
    }
}
