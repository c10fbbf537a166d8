//! Dispatch of packets arriving over the inter channel.
//!
//! Another server process publishes a packet to `inter.<scope>.<id>`; every
//! process receives it on its own inter queue. Each one dispatches it for
//! the recipients it hosts and ignores the rest, so a packet addressed to a
//! user is handled exactly where that user's sessions live.

use std::sync::Arc;

use apollo_bus::InterHandler;
use apollo_protocol::{Destination, Origin, ProtocolError, Scope};
use apollo_session::{Session, Store, User, UserFilter};

use crate::{Core, SessionLike};

pub struct InterDispatcher<S: Store> {
    core: Arc<Core<S>>,
}

impl<S: Store> InterDispatcher<S> {
    pub fn new(core: Arc<Core<S>>) -> Self {
        Self { core }
    }

    /// The local recipients of a packet sent to `scope`.
    ///
    /// A session scope names one transport. Every other scope resolves to
    /// the online users it covers that have a session on this process.
    async fn recipients(&self, scope: &Scope) -> Vec<SessionLike> {
        let filter = match scope {
            Scope::Session(token) => {
                if self.core.transport(token).await.is_none() {
                    return Vec::new();
                }
                let user_id = match self.core.store().get::<Session>(token).await {
                    Ok(session) => session.and_then(|s| s.user_id),
                    Err(e) => {
                        tracing::warn!(%token, error = %e, "session lookup failed");
                        return Vec::new();
                    }
                };
                return vec![SessionLike::Live {
                    token: token.clone(),
                    user_id,
                }];
            }
            Scope::User(user_id) => {
                return if self.core.local_tokens_of(*user_id).await.is_empty() {
                    Vec::new()
                } else {
                    vec![SessionLike::Remote(*user_id)]
                };
            }
            Scope::Location(location) => UserFilter::online().at_location(*location),
            Scope::Group(group) => UserFilter::online().in_group(*group),
            Scope::Realm(realm) => UserFilter::online().in_realm(*realm),
            Scope::Global => UserFilter::online(),
        };

        let users = match self.core.store().find::<User>(&filter).await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!(?scope, error = %e, "recipient lookup failed");
                return Vec::new();
            }
        };

        let mut recipients = Vec::new();
        for user in users {
            if !self.core.local_tokens_of(user.id).await.is_empty() {
                recipients.push(SessionLike::Remote(user.id));
            }
        }
        recipients
    }
}

impl<S: Store> InterHandler for InterDispatcher<S> {
    async fn on_inter(&self, destination: Destination, payload: Vec<u8>) {
        let packet = match self.core.dispatcher().decode(&payload) {
            Ok(packet) => packet.tagged(Origin::Inter),
            Err(ProtocolError::UnknownPacketType(name)) => {
                tracing::debug!(%destination, packet = %name, "unknown inter packet dropped");
                return;
            }
            Err(e) => {
                tracing::warn!(%destination, error = %e, "malformed inter packet dropped");
                return;
            }
        };

        let recipients = self.recipients(&destination.scope).await;
        tracing::debug!(%destination, packet = packet.name(), count = recipients.len(), "inter packet");

        for session in &recipients {
            // Failures are already reported to the recipient.
            let _ = self.core.dispatch(session, packet.clone()).await;
        }
    }
}
