//! Destination routing: logical destinations to broker routing keys.
//!
//! Every packet on the bus is published to a routing key of the form
//! `<class>.<scope>.<id>`:
//!
//! ```text
//! ex.session.9f86d081     one connection
//! ex.user.42              every session of user 42
//! ex.loc.7                everyone standing in location 7
//! ex.group.3 / ex.realm.1 everyone in group 3 / realm 1
//! ex.global               everyone
//! inter.user.42           server-to-server control packet about user 42
//! ```
//!
//! The class is either `ex` (reaches browsers) or `inter` (reaches server
//! processes). The two never share a routing key, and queue names live in
//! a third namespace (`ex-<token>`, `inter-<server>`) that no routing key
//! can collide with. These strings are the only addressing shared between
//! processes, so the format must not change between releases.

use std::fmt;
use std::str::FromStr;

use crate::{GroupId, LocationId, ProtocolError, RealmId, SessionToken, UserId};

/// Destination class: who is meant to read the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// External: delivered to connected clients.
    Ex,
    /// Inter-server: delivered to server processes.
    Inter,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ex => "ex",
            Self::Inter => "inter",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fan-out scope of a destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Session(SessionToken),
    User(UserId),
    Location(LocationId),
    Group(GroupId),
    Realm(RealmId),
    Global,
}

impl Scope {
    /// The scope segment as it appears in routing keys.
    pub fn word(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::User(_) => "user",
            Self::Location(_) => "loc",
            Self::Group(_) => "group",
            Self::Realm(_) => "realm",
            Self::Global => "global",
        }
    }
}

/// A fully resolved destination: class plus scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub channel: Channel,
    pub scope: Scope,
}

impl Destination {
    pub fn new(channel: Channel, scope: Scope) -> Self {
        Self { channel, scope }
    }

    /// Shorthand for an `ex` destination.
    pub fn ex(scope: Scope) -> Self {
        Self::new(Channel::Ex, scope)
    }

    /// Shorthand for an `inter` destination.
    pub fn inter(scope: Scope) -> Self {
        Self::new(Channel::Inter, scope)
    }

    /// Renders the broker routing key.
    pub fn routing_key(&self) -> String {
        let class = self.channel.as_str();
        let word = self.scope.word();
        match &self.scope {
            Scope::Session(token) => format!("{class}.{word}.{token}"),
            Scope::User(id) => format!("{class}.{word}.{}", id.0),
            Scope::Location(id) => format!("{class}.{word}.{}", id.0),
            Scope::Group(id) => format!("{class}.{word}.{}", id.0),
            Scope::Realm(id) => format!("{class}.{word}.{}", id.0),
            Scope::Global => format!("{class}.{word}"),
        }
    }

    /// Binding pattern matching every routing key of one class.
    pub fn all(channel: Channel) -> String {
        format!("{channel}.#")
    }

    /// Parses a routing key produced by [`routing_key`](Self::routing_key).
    ///
    /// # Errors
    /// `InvalidDestination` for an unknown class or scope, a missing or
    /// extra segment, a non-numeric id, or a wildcard.
    pub fn parse(key: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidDestination(key.to_owned());

        let mut parts = key.split('.');
        let channel = match parts.next() {
            Some("ex") => Channel::Ex,
            Some("inter") => Channel::Inter,
            _ => return Err(invalid()),
        };
        let word = parts.next().ok_or_else(invalid)?;
        let id = parts.next();
        if parts.next().is_some() {
            return Err(invalid());
        }

        let numeric = |id: Option<&str>| -> Result<u64, ProtocolError> {
            id.and_then(|s| s.parse().ok()).ok_or_else(invalid)
        };

        let scope = match word {
            "global" if id.is_none() => Scope::Global,
            "session" => match id {
                Some(token) if is_token(token) => Scope::Session(SessionToken::new(token)),
                _ => return Err(invalid()),
            },
            "user" => Scope::User(UserId(numeric(id)?)),
            "loc" => Scope::Location(LocationId(numeric(id)?)),
            "group" => Scope::Group(GroupId(numeric(id)?)),
            "realm" => Scope::Realm(RealmId(numeric(id)?)),
            _ => return Err(invalid()),
        };
        Ok(Self { channel, scope })
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.routing_key())
    }
}

impl FromStr for Destination {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Name of the private queue that feeds one session.
pub fn private_queue(token: &SessionToken) -> String {
    format!("ex-{token}")
}

/// Name of the queue a server process reads inter-server packets from.
pub fn inter_queue(server_id: &str) -> String {
    format!("inter-{server_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_renders_each_scope() {
        let token = SessionToken::from("abc");
        assert_eq!(Destination::ex(Scope::Session(token)).routing_key(), "ex.session.abc");
        assert_eq!(Destination::ex(Scope::User(UserId(4))).routing_key(), "ex.user.4");
        assert_eq!(Destination::inter(Scope::Location(LocationId(9))).routing_key(), "inter.loc.9");
        assert_eq!(Destination::ex(Scope::Group(GroupId(2))).routing_key(), "ex.group.2");
        assert_eq!(Destination::ex(Scope::Realm(RealmId(1))).routing_key(), "ex.realm.1");
        assert_eq!(Destination::inter(Scope::Global).routing_key(), "inter.global");
    }

    #[test]
    fn test_parse_inverts_routing_key() {
        for key in ["ex.session.abc", "ex.user.4", "inter.loc.9", "ex.group.2", "inter.realm.1", "ex.global"] {
            let dest: Destination = key.parse().unwrap();
            assert_eq!(dest.routing_key(), key);
        }
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for key in [
            "",
            "ex",
            "web.user.1",
            "ex.user",
            "ex.user.x",
            "ex.user.1.2",
            "ex.global.1",
            "ex.session.",
            "ex.session.*",
            "inter.#",
            "ex.planet.3",
        ] {
            assert!(
                matches!(Destination::parse(key), Err(ProtocolError::InvalidDestination(_))),
                "{key} should not parse"
            );
        }
    }

    #[test]
    fn test_ex_and_inter_keys_are_disjoint() {
        let scope = Scope::User(UserId(1));
        let ex = Destination::ex(scope.clone()).routing_key();
        let inter = Destination::inter(scope).routing_key();
        assert_ne!(ex, inter);
        assert!(!inter.starts_with("ex."));
        assert_eq!(Destination::all(Channel::Inter), "inter.#");
    }

    #[test]
    fn test_queue_names_never_parse_as_destinations() {
        let token = SessionToken::from("abc");
        assert_eq!(private_queue(&token), "ex-abc");
        assert!(Destination::parse(&private_queue(&token)).is_err());
        assert!(Destination::parse(&inter_queue("s1")).is_err());
    }
}
