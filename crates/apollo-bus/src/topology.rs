//! Which destinations a session's private queue is bound to.
//!
//! A queue `ex-<token>` is always bound to `ex.session.<token>`. After a
//! login it is also bound to the user's fan-out scopes:
//!
//! ```text
//! ex.global, ex.user.<id>, ex.loc.<id>, [ex.group.<id>], [ex.realm.<id>]
//! ```
//!
//! Login walks those bindings through the [`LoginBinding`] state machine so
//! the order is fixed and a failure names the step it stopped at.

use std::fmt;

use apollo_protocol::{Destination, Scope, SessionToken};
use apollo_session::{Session, User};

use crate::{Bus, BusError};

/// The binding every private queue has from birth.
pub fn session_binding(token: &SessionToken) -> Destination {
    Destination::ex(Scope::Session(token.clone()))
}

/// Bindings a consumer re-asserts when it starts.
///
/// Location, group and realm bindings are left to login and move, which
/// own those transitions; re-asserting them here could race a rebind.
pub fn consumer_bindings(session: &Session) -> Vec<Destination> {
    let mut bindings = vec![session_binding(&session.token)];
    if let Some(user_id) = session.user_id {
        bindings.push(Destination::ex(Scope::Global));
        bindings.push(Destination::ex(Scope::User(user_id)));
    }
    bindings
}

/// Every fan-out binding of a logged-in user, in login order.
pub fn user_bindings(user: &User) -> Vec<Destination> {
    LoginBinding::BindingGlobal
        .walk()
        .filter_map(|stage| stage.destination(user))
        .collect()
}

// ---------------------------------------------------------------------------
// LoginBinding
// ---------------------------------------------------------------------------

/// Progress of the login binding sequence.
///
/// ```text
/// BindingGlobal → BindingUser → BindingLocation → BindingGroup → BindingRealm → Ready
/// ```
///
/// Group and realm steps bind nothing for users without one, but are
/// still visited so the order never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginBinding {
    BindingGlobal,
    BindingUser,
    BindingLocation,
    BindingGroup,
    BindingRealm,
    Ready,
}

impl LoginBinding {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::BindingGlobal => Some(Self::BindingUser),
            Self::BindingUser => Some(Self::BindingLocation),
            Self::BindingLocation => Some(Self::BindingGroup),
            Self::BindingGroup => Some(Self::BindingRealm),
            Self::BindingRealm => Some(Self::Ready),
            Self::Ready => None,
        }
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }

    /// This state and every later one.
    fn walk(self) -> impl Iterator<Item = Self> {
        std::iter::successors(Some(self), |s| s.next())
    }

    /// What this step binds for `user`, if anything.
    pub fn destination(self, user: &User) -> Option<Destination> {
        let scope = match self {
            Self::BindingGlobal => Scope::Global,
            Self::BindingUser => Scope::User(user.id),
            Self::BindingLocation => Scope::Location(user.location_id),
            Self::BindingGroup => Scope::Group(user.group_id?),
            Self::BindingRealm => Scope::Realm(user.realm_id?),
            Self::Ready => return None,
        };
        Some(Destination::ex(scope))
    }
}

impl fmt::Display for LoginBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindingGlobal => write!(f, "BindingGlobal"),
            Self::BindingUser => write!(f, "BindingUser"),
            Self::BindingLocation => write!(f, "BindingLocation"),
            Self::BindingGroup => write!(f, "BindingGroup"),
            Self::BindingRealm => write!(f, "BindingRealm"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Binds `queue` to every fan-out scope of `user`, one step at a time.
///
/// Each bind completes before the next starts. Returns the states visited,
/// ending with `Ready`.
///
/// # Errors
/// `BusError::Binding` naming the state whose bind failed. Bindings made
/// by earlier states are left in place; tearing the queue down removes
/// them.
pub async fn bind_login_topology(
    bus: &Bus,
    queue: &str,
    user: &User,
) -> Result<Vec<LoginBinding>, BusError> {
    let mut visited = Vec::new();
    let mut state = LoginBinding::BindingGlobal;
    loop {
        visited.push(state);
        if let Some(destination) = state.destination(user) {
            bus.bind_queue(queue, &destination)
                .await
                .map_err(|e| BusError::Binding {
                    stage: state,
                    source: Box::new(e),
                })?;
            tracing::trace!(queue, stage = %state, destination = %destination, "login binding");
        }
        match state.next() {
            Some(next) => state = next,
            None => return Ok(visited),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollo_protocol::{GroupId, LocationId, RealmId, UserId};
    use std::time::SystemTime;

    use crate::BrokerConfig;

    fn alice() -> User {
        User::new(UserId(1), "alice", "pw", LocationId(10))
    }

    #[test]
    fn test_login_binding_next_follows_strict_order() {
        let order: Vec<_> = LoginBinding::BindingGlobal.walk().collect();
        assert_eq!(
            order,
            vec![
                LoginBinding::BindingGlobal,
                LoginBinding::BindingUser,
                LoginBinding::BindingLocation,
                LoginBinding::BindingGroup,
                LoginBinding::BindingRealm,
                LoginBinding::Ready,
            ]
        );
        assert!(LoginBinding::BindingUser.can_transition_to(LoginBinding::BindingLocation));
        assert!(!LoginBinding::BindingGlobal.can_transition_to(LoginBinding::Ready));
    }

    #[test]
    fn test_user_bindings_skip_missing_group_and_realm() {
        let keys: Vec<String> = user_bindings(&alice()).iter().map(|d| d.routing_key()).collect();
        assert_eq!(keys, vec!["ex.global", "ex.user.1", "ex.loc.10"]);

        let full = alice().in_group(GroupId(2)).in_realm(RealmId(3));
        let keys: Vec<String> = user_bindings(&full).iter().map(|d| d.routing_key()).collect();
        assert_eq!(keys, vec!["ex.global", "ex.user.1", "ex.loc.10", "ex.group.2", "ex.realm.3"]);
    }

    #[test]
    fn test_consumer_bindings_depend_on_authentication() {
        let mut session = Session::new(SessionToken::new("tok"), SystemTime::now());
        let keys: Vec<String> = consumer_bindings(&session).iter().map(|d| d.routing_key()).collect();
        assert_eq!(keys, vec!["ex.session.tok"]);

        session.user_id = Some(UserId(5));
        let keys: Vec<String> = consumer_bindings(&session).iter().map(|d| d.routing_key()).collect();
        assert_eq!(keys, vec!["ex.session.tok", "ex.global", "ex.user.5"]);
    }

    #[tokio::test]
    async fn test_bind_login_topology_binds_in_order() {
        let bus = Bus::connect(&BrokerConfig::default()).unwrap();
        bus.declare_queue("ex-tok").await.unwrap();

        let visited = bind_login_topology(&bus, "ex-tok", &alice().in_realm(RealmId(4)))
            .await
            .unwrap();
        assert_eq!(visited.len(), 6);
        assert_eq!(visited.last(), Some(&LoginBinding::Ready));

        let info = bus.inspect("ex-tok").await.unwrap().unwrap();
        assert_eq!(info.bindings, vec!["ex.global", "ex.loc.10", "ex.realm.4", "ex.user.1"]);
    }

    #[tokio::test]
    async fn test_bind_login_topology_stops_at_failing_state() {
        let bus = Bus::connect(&BrokerConfig::default()).unwrap();
        let err = bind_login_topology(&bus, "missing", &alice()).await.unwrap_err();
        assert!(matches!(
            err,
            BusError::Binding {
                stage: LoginBinding::BindingGlobal,
                ..
            }
        ));
    }
}
