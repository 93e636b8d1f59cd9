//! Channel mode-delta algebra.
//!
//! Mode changes are expressed as tri-state deltas so that a change can
//! be filtered by authority, applied conditionally, and re-serialized
//! without losing which flags were touched. The textual format maps
//! each flag to a single letter: `t` topic-protected, `n` no-external,
//! `s` secret, `m` moderated, `q` owner, `a` admin, `o` op, `h` halfop,
//! `v` voice.

use serde::{Deserialize, Serialize};

use crate::state::channel::Channel;
use crate::state::client::ClientId;

/// One flag's worth of change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeDelta {
    #[default]
    Unchanged,
    Added,
    Removed,
}

/// A change to a channel's own modes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelModeDelta {
    pub topic_protected: ModeDelta,
    pub no_external_messages: ModeDelta,
    pub moderated: ModeDelta,
    pub secret: ModeDelta,
    pub limit: ModeDelta,
    pub key: ModeDelta,
    pub limit_value: u32,
    pub key_value: String,
}

impl ChannelModeDelta {
    pub fn is_empty(&self) -> bool {
        self.topic_protected == ModeDelta::Unchanged
            && self.no_external_messages == ModeDelta::Unchanged
            && self.moderated == ModeDelta::Unchanged
            && self.secret == ModeDelta::Unchanged
            && self.limit == ModeDelta::Unchanged
            && self.key == ModeDelta::Unchanged
    }
}

/// A change to one member's privileges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberModeDelta {
    pub client: ClientId,
    pub is_owner: ModeDelta,
    pub is_admin: ModeDelta,
    pub is_op: ModeDelta,
    pub is_halfop: ModeDelta,
    pub is_voice: ModeDelta,
}

impl MemberModeDelta {
    pub fn new(client: ClientId) -> Self {
        Self {
            client,
            is_owner: ModeDelta::Unchanged,
            is_admin: ModeDelta::Unchanged,
            is_op: ModeDelta::Unchanged,
            is_halfop: ModeDelta::Unchanged,
            is_voice: ModeDelta::Unchanged,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_owner == ModeDelta::Unchanged
            && self.is_admin == ModeDelta::Unchanged
            && self.is_op == ModeDelta::Unchanged
            && self.is_halfop == ModeDelta::Unchanged
            && self.is_voice == ModeDelta::Unchanged
    }
}

/// Parse a textual mode change (`+nt-s`, `+ov nick nick`, ...) into
/// deltas. Member mode letters consume one positional argument each,
/// resolved to a client through `resolve`; a letter whose argument is
/// missing or does not resolve is skipped silently.
pub fn parse_channel_mode_string(
    modes: &str,
    args: &[&str],
    mut resolve: impl FnMut(&str) -> Option<ClientId>,
) -> (ChannelModeDelta, Vec<MemberModeDelta>) {
    let mut channel = ChannelModeDelta::default();
    let mut member: Vec<MemberModeDelta> = Vec::new();
    let mut args = args.iter();
    let mut operation = ModeDelta::Unchanged;

    for letter in modes.chars() {
        match letter {
            '+' => operation = ModeDelta::Added,
            '-' => operation = ModeDelta::Removed,
            'q' | 'a' | 'o' | 'h' | 'v' => {
                let Some(arg) = args.next() else {
                    continue;
                };
                let Some(target) = resolve(arg) else {
                    continue;
                };

                let delta = match member.iter_mut().find(|d| d.client == target) {
                    Some(delta) => delta,
                    None => {
                        member.push(MemberModeDelta::new(target));
                        member.last_mut().unwrap()
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
            'm' => channel.moderated = operation,
            'n' => channel.no_external_messages = operation,
            's' => channel.secret = operation,
            't' => channel.topic_protected = operation,
            _ => {}
        }
    }

    (channel, member)
}

/// Serialize deltas back into textual form: a single `+...` group
/// followed by a single `-...` group, then the member arguments in
/// left-to-right order, space-separated.
pub fn serialize_channel_modes(
    channel: &ChannelModeDelta,
    member: &[MemberModeDelta],
    mut serialize_client: impl FnMut(&ClientId) -> String,
) -> String {
    let mut modes = String::new();
    let mut args: Vec<String> = Vec::new();
    let mut last_op = ModeDelta::Unchanged;

    let mut process = |operation: ModeDelta, modes: &mut String, args: &mut Vec<String>| {
        let mut push = |letter: char, modes: &mut String| {
            if last_op != operation {
                modes.push(match operation {
                    ModeDelta::Added => '+',
                    ModeDelta::Removed => '-',
                    ModeDelta::Unchanged => return,
                });
                last_op = operation;
            }
            modes.push(letter);
        };

        if channel.moderated == operation {
            push('m', modes);
        }
        if channel.no_external_messages == operation {
            push('n', modes);
        }
        if channel.secret == operation {
            push('s', modes);
        }
        if channel.topic_protected == operation {
            push('t', modes);
        }

        for delta in member {
            if delta.is_owner == operation {
                push('q', modes);
                args.push(serialize_client(&delta.client));
            }
            if delta.is_admin == operation {
                push('a', modes);
                args.push(serialize_client(&delta.client));
            }
            if delta.is_op == operation {
                push('o', modes);
                args.push(serialize_client(&delta.client));
            }
            if delta.is_halfop == operation {
                push('h', modes);
                args.push(serialize_client(&delta.client));
            }
            if delta.is_voice == operation {
                push('v', modes);
                args.push(serialize_client(&delta.client));
            }
        }
    };

    process(ModeDelta::Added, &mut modes, &mut args);
    process(ModeDelta::Removed, &mut modes, &mut args);

    let mut out = modes;
    for arg in args {
        out.push(' ');
        out.push_str(&arg);
    }
    out
}

/// Restrict a requested mode change to what `actor` has the authority
/// to apply on `channel`.
///
/// Owners may apply anything. Ops may change channel modes and grant or
/// revoke op, halfop and voice. Halfops may change channel modes and
/// grant or revoke halfop and voice. Admins without owner may change
/// channel modes only. Everyone else, including non-members, has no
/// authority.
pub fn filter_channel_modes(
    channel: &Channel,
    actor: &ClientId,
    channel_mode: &ChannelModeDelta,
    member_deltas: &[MemberModeDelta],
) -> (ChannelModeDelta, Vec<MemberModeDelta>) {
    let Some(membership) = channel.members.get(&actor.nick) else {
        return (ChannelModeDelta::default(), Vec::new());
    };

    let mut out_mode = ChannelModeDelta::default();
    let mut out_member = Vec::new();

    for delta in member_deltas {
        let mut out = MemberModeDelta::new(delta.client.clone());

        if membership.is_owner {
            out = delta.clone();
        } else if membership.is_op {
            out.is_op = delta.is_op;
            out.is_halfop = delta.is_halfop;
            out.is_voice = delta.is_voice;
        } else if membership.is_halfop {
            out.is_halfop = delta.is_halfop;
            out.is_voice = delta.is_voice;
        }

        if !out.is_empty() {
            out_member.push(out);
        }
    }

    if membership.is_owner || membership.is_admin || membership.is_op || membership.is_halfop {
        out_mode.moderated = channel_mode.moderated;
        out_mode.no_external_messages = channel_mode.no_external_messages;
        out_mode.secret = channel_mode.secret;
        out_mode.topic_protected = channel_mode.topic_protected;
        out_mode.limit = channel_mode.limit;
        out_mode.limit_value = channel_mode.limit_value;
        out_mode.key = channel_mode.key;
        out_mode.key_value = channel_mode.key_value.clone();
    }

    (out_mode, out_member)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::channel::Membership;
    use chrono::Utc;

    fn cid(nick: &str) -> ClientId {
        ClientId {
            server: "hub.a".into(),
            subnet: "test".into(),
            nick: nick.into(),
        }
    }

    #[test]
    fn parse_simple() {
        let (channel, member) = parse_channel_mode_string("+nt", &[], |_| None);
        assert_eq!(channel.no_external_messages, ModeDelta::Added);
        assert_eq!(channel.topic_protected, ModeDelta::Added);
        assert!(member.is_empty());
    }

    #[test]
    fn parse_with_member_arg() {
        let target = cid("client");
        let (_, member) = parse_channel_mode_string("+nth", &["client"], |name| {
            assert_eq!(name, "client");
            Some(target.clone())
        });
        assert_eq!(member.len(), 1);
        assert_eq!(member[0].client, target);
        assert_eq!(member[0].is_halfop, ModeDelta::Added);
    }

    #[test]
    fn parse_missing_argument_skips_letter() {
        let (channel, member) = parse_channel_mode_string("+ot", &[], |_| Some(cid("x")));
        assert!(member.is_empty());
        assert_eq!(channel.topic_protected, ModeDelta::Added);
    }

    #[test]
    fn parse_unresolvable_target_skips_letter() {
        let (_, member) = parse_channel_mode_string("+v", &["ghost"], |_| None);
        assert!(member.is_empty());
    }

    #[test]
    fn serialize_simple() {
        let channel = ChannelModeDelta {
            topic_protected: ModeDelta::Added,
            moderated: ModeDelta::Added,
            ..Default::default()
        };
        let s = serialize_channel_modes(&channel, &[], |_| unreachable!());
        assert_eq!(s, "+mt");
    }

    #[test]
    fn serialize_mixed_operations_and_args() {
        let channel = ChannelModeDelta {
            topic_protected: ModeDelta::Removed,
            moderated: ModeDelta::Added,
            ..Default::default()
        };
        let mut member = MemberModeDelta::new(cid("client"));
        member.is_owner = ModeDelta::Added;
        member.is_op = ModeDelta::Removed;

        let s = serialize_channel_modes(&channel, &[member], |id| id.nick.clone());
        assert_eq!(s, "+mq-to client client");
    }

    #[test]
    fn parse_serialize_round_trip() {
        let target = cid("client");
        let resolve = |name: &str| (name == "client").then(|| target.clone());
        let (channel, member) = parse_channel_mode_string("+mh-s", &["client"], resolve);
        let s = serialize_channel_modes(&channel, &member, |id| id.nick.clone());
        let (channel2, member2) = parse_channel_mode_string(
            s.split(' ').next().unwrap(),
            &["client"],
            resolve,
        );
        assert_eq!(channel, channel2);
        assert_eq!(member, member2);
    }

    fn channel_with_actor(privileges: impl FnOnce(&mut Membership)) -> (Channel, ClientId) {
        let actor = cid("actor");
        let mut channel = Channel::new("test", "#test");
        let mut membership = Membership::new(Utc::now());
        privileges(&mut membership);
        channel.members.insert(actor.nick.clone(), membership);
        (channel, actor)
    }

    fn full_grant(target: &ClientId) -> MemberModeDelta {
        MemberModeDelta {
            client: target.clone(),
            is_owner: ModeDelta::Added,
            is_admin: ModeDelta::Added,
            is_op: ModeDelta::Added,
            is_halfop: ModeDelta::Added,
            is_voice: ModeDelta::Added,
        }
    }

    #[test]
    fn filter_owner_passes_everything() {
        let (channel, actor) = channel_with_actor(|m| m.is_owner = true);
        let request = ChannelModeDelta {
            secret: ModeDelta::Added,
            ..Default::default()
        };
        let target = cid("target");
        let (mode, member) =
            filter_channel_modes(&channel, &actor, &request, &[full_grant(&target)]);
        assert_eq!(mode.secret, ModeDelta::Added);
        assert_eq!(member.len(), 1);
        assert_eq!(member[0].is_owner, ModeDelta::Added);
        assert_eq!(member[0].is_admin, ModeDelta::Added);
    }

    #[test]
    fn filter_op_limited_to_op_halfop_voice() {
        let (channel, actor) = channel_with_actor(|m| m.is_op = true);
        let target = cid("target");
        let (_, member) = filter_channel_modes(
            &channel,
            &actor,
            &ChannelModeDelta::default(),
            &[full_grant(&target)],
        );
        assert_eq!(member.len(), 1);
        assert_eq!(member[0].is_owner, ModeDelta::Unchanged);
        assert_eq!(member[0].is_admin, ModeDelta::Unchanged);
        assert_eq!(member[0].is_op, ModeDelta::Added);
        assert_eq!(member[0].is_halfop, ModeDelta::Added);
        assert_eq!(member[0].is_voice, ModeDelta::Added);
    }

    #[test]
    fn filter_admin_gets_channel_flags_only() {
        let (channel, actor) = channel_with_actor(|m| m.is_admin = true);
        let request = ChannelModeDelta {
            moderated: ModeDelta::Added,
            ..Default::default()
        };
        let target = cid("target");
        let (mode, member) =
            filter_channel_modes(&channel, &actor, &request, &[full_grant(&target)]);
        assert_eq!(mode.moderated, ModeDelta::Added);
        assert!(member.is_empty());
    }

    #[test]
    fn filter_non_member_gets_nothing() {
        let channel = Channel::new("test", "#test");
        let request = ChannelModeDelta {
            moderated: ModeDelta::Added,
            ..Default::default()
        };
        let (mode, member) =
            filter_channel_modes(&channel, &cid("stranger"), &request, &[]);
        assert!(mode.is_empty());
        assert!(member.is_empty());
    }

    #[test]
    fn filter_plain_member_gets_nothing() {
        let (channel, actor) = channel_with_actor(|m| m.is_voice = true);
        let request = ChannelModeDelta {
            moderated: ModeDelta::Added,
            ..Default::default()
        };
        let target = cid("target");
        let (mode, member) =
            filter_channel_modes(&channel, &actor, &request, &[full_grant(&target)]);
        assert!(mode.is_empty());
        assert!(member.is_empty());
    }
}
