//! Who a packet is being dispatched for.

use std::fmt;

use apollo_protocol::{Destination, Scope, SessionToken, UserId};

/// The context a packet handler acts on behalf of.
///
/// Client actions arrive on a live session. Inter-server packets have no
/// connection behind them, only the user they were addressed to, so
/// replies go through the user's fan-out destination instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLike {
    /// A session whose token came with the request.
    Live {
        token: SessionToken,
        user_id: Option<UserId>,
    },
    /// A user reached through the bus.
    Remote(UserId),
}

impl SessionLike {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Live { user_id, .. } => *user_id,
            Self::Remote(user_id) => Some(*user_id),
        }
    }

    pub fn token(&self) -> Option<&SessionToken> {
        match self {
            Self::Live { token, .. } => Some(token),
            Self::Remote(_) => None,
        }
    }

    /// Where direct replies go: the session itself when there is one,
    /// otherwise every session of the user.
    pub fn reply_to(&self) -> Destination {
        match self {
            Self::Live { token, .. } => Destination::ex(Scope::Session(token.clone())),
            Self::Remote(user_id) => Destination::ex(Scope::User(*user_id)),
        }
    }
}

impl fmt::Display for SessionLike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live { token, user_id: Some(user) } => write!(f, "{token} ({user})"),
            Self::Live { token, user_id: None } => write!(f, "{token}"),
            Self::Remote(user) => write!(f, "remote {user}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_destinations() {
        let live = SessionLike::Live {
            token: SessionToken::new("abc"),
            user_id: None,
        };
        assert_eq!(live.reply_to().routing_key(), "ex.session.abc");
        assert_eq!(live.user_id(), None);

        let remote = SessionLike::Remote(UserId(4));
        assert_eq!(remote.reply_to().routing_key(), "ex.user.4");
        assert_eq!(remote.user_id(), Some(UserId(4)));
        assert!(remote.token().is_none());
    }
}
