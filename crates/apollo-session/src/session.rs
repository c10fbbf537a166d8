//! The session record: the durable side of one connection.
//!
//! A session is created the first time a browser asks for a token, before
//! anyone has logged in. It tracks:
//! - WHICH connection it is (the token, also its capability)
//! - WHEN it was created and last heard from (for the reaper)
//! - WHO is logged in on it, if anyone
//!
//! Sessions live in the store, not in process memory, so any server
//! process can look one up. The live half of a connection is the
//! [`Transport`](apollo_transport::Transport), which only exists on the
//! process that handed out the token.

use std::time::{Duration, SystemTime};

use apollo_protocol::{SessionToken, UserId, private_queue};
use serde::{Deserialize, Serialize};

use crate::Record;

/// A store-backed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: SessionToken,
    pub created_at: SystemTime,
    pub last_active: SystemTime,
    /// `None` until a login succeeds on this session.
    pub user_id: Option<UserId>,
}

impl Session {
    /// A fresh, unauthenticated session.
    pub fn new(token: SessionToken, now: SystemTime) -> Self {
        Self {
            token,
            created_at: now,
            last_active: now,
            user_id: None,
        }
    }

    /// Name of the private queue feeding this session.
    pub fn queue_name(&self) -> String {
        private_queue(&self.token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Records activity at `now`.
    pub fn touch(&mut self, now: SystemTime) {
        if now > self.last_active {
            self.last_active = now;
        }
    }

    /// Whether the session has been idle for at least `expiry` at `now`.
    pub fn is_expired(&self, now: SystemTime, expiry: Duration) -> bool {
        match now.checked_sub(expiry) {
            Some(cutoff) => self.last_active <= cutoff,
            None => false,
        }
    }
}

/// Query over sessions. Unset criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub token: Option<SessionToken>,
    pub user_id: Option<UserId>,
    /// Matches sessions whose `last_active` is at or before this instant.
    pub inactive_since: Option<SystemTime>,
}

impl SessionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_token(token: SessionToken) -> Self {
        Self {
            token: Some(token),
            ..Self::default()
        }
    }

    pub fn by_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn inactive_since(cutoff: SystemTime) -> Self {
        Self {
            inactive_since: Some(cutoff),
            ..Self::default()
        }
    }
}

impl Record for Session {
    type Id = SessionToken;
    type Filter = SessionFilter;
    const KIND: &'static str = "session";

    fn id(&self) -> SessionToken {
        self.token.clone()
    }

    fn matches(&self, filter: &SessionFilter) -> bool {
        filter.token.as_ref().is_none_or(|t| *t == self.token)
            && filter.user_id.is_none_or(|u| self.user_id == Some(u))
            && filter.inactive_since.is_none_or(|cutoff| self.last_active <= cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_new_session_is_unauthenticated() {
        let s = Session::new(SessionToken::from("abc"), at(10));
        assert!(!s.is_authenticated());
        assert_eq!(s.queue_name(), "ex-abc");
        assert_eq!(s.created_at, s.last_active);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut s = Session::new(SessionToken::from("abc"), at(10));
        s.touch(at(20));
        s.touch(at(15));
        assert_eq!(s.last_active, at(20));
    }

    #[test]
    fn test_is_expired_boundary_is_inclusive() {
        let s = Session::new(SessionToken::from("abc"), at(100));
        let expiry = Duration::from_secs(3600);
        assert!(!s.is_expired(at(3699), expiry));
        assert!(s.is_expired(at(3700), expiry));
    }

    #[test]
    fn test_filter_matches_all_criteria() {
        let mut s = Session::new(SessionToken::from("abc"), at(100));
        s.user_id = Some(UserId(7));

        assert!(s.matches(&SessionFilter::all()));
        assert!(s.matches(&SessionFilter::by_user(UserId(7))));
        assert!(!s.matches(&SessionFilter::by_user(UserId(8))));
        assert!(s.matches(&SessionFilter::inactive_since(at(100))));
        assert!(!s.matches(&SessionFilter::inactive_since(at(99))));
        assert!(!s.matches(&SessionFilter::by_token(SessionToken::from("xyz"))));
    }
}
