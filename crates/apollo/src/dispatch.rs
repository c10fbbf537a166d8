//! Packet dispatch: the registry of handlers and the checks around them.
//!
//! Every packet kind the server understands is registered once at startup
//! with a [`PacketHandler`]. Dispatching a packet:
//!
//! 1. finds the handler by packet name,
//! 2. enforces its [`Requirement`],
//! 3. runs the before-hooks, any of which may veto,
//! 4. runs the handler,
//! 5. runs the after-hooks.

use std::sync::Arc;

use apollo_protocol::{JsonCodec, Packet, PacketKind, PacketRegistry, ProtocolError};
use apollo_session::{Group, Store, User};
use futures_util::future::BoxFuture;

use crate::error::NOT_PERMITTED;
use crate::{Core, DispatchError, Hooks, SessionLike};

/// What a session must have before a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    None,
    /// A user must be bound to the session.
    Authenticated,
    /// An authenticated user whose group grants this permission.
    Permission(&'static str),
}

/// Handles one packet kind.
///
/// Object safe so handlers of different kinds share one registry; the
/// future is boxed for the same reason.
pub trait PacketHandler<S: Store>: Send + Sync + 'static {
    fn requirement(&self) -> Requirement {
        Requirement::None
    }

    fn dispatch<'a>(
        &'a self,
        core: &'a Core<S>,
        session: &'a SessionLike,
        packet: Packet,
    ) -> BoxFuture<'a, Result<(), DispatchError>>;
}

pub struct Dispatcher<S: Store> {
    registry: PacketRegistry<Arc<dyn PacketHandler<S>>>,
    hooks: Hooks,
    codec: JsonCodec,
}

impl<S: Store> Dispatcher<S> {
    /// An empty dispatcher. Nothing is understood until registered.
    pub fn new() -> Self {
        Self {
            registry: PacketRegistry::new(),
            hooks: Hooks::new(),
            codec: JsonCodec,
        }
    }

    /// A dispatcher with every built-in packet kind registered.
    pub fn with_defaults() -> Self {
        let mut dispatcher = Self::new();
        crate::packets::register_defaults(&mut dispatcher);
        dispatcher
    }

    /// Registers `handler` for packet kind `K`, replacing any earlier one.
    pub fn register<K: PacketKind>(&mut self, handler: impl PacketHandler<S>) -> &mut Self {
        if self.registry.register::<K>(Arc::new(handler)).is_some() {
            tracing::debug!(packet = K::NAME, "packet handler replaced");
        }
        self
    }

    pub fn set_hooks(&mut self, hooks: Hooks) -> &mut Self {
        self.hooks = hooks;
        self
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn registry(&self) -> &PacketRegistry<Arc<dyn PacketHandler<S>>> {
        &self.registry
    }

    /// Decodes bytes into a packet of a registered kind.
    ///
    /// # Errors
    /// `UnknownPacketType` for unregistered names, `Decode` for anything
    /// that is not a packet object.
    pub fn decode(&self, bytes: &[u8]) -> Result<Packet, ProtocolError> {
        self.registry.decode(&self.codec, bytes).map(|(packet, _)| packet)
    }

    pub async fn dispatch(
        &self,
        core: &Core<S>,
        session: &SessionLike,
        packet: Packet,
    ) -> Result<(), DispatchError> {
        let Some(handler) = self.registry.get(packet.name()) else {
            tracing::debug!(packet = packet.name(), "no handler, packet dropped");
            return Ok(());
        };

        check_requirement(core, session, handler.requirement()).await?;

        self.hooks
            .run_before(session, &packet)
            .map_err(DispatchError::UnauthorizedAction)?;

        let observed = self.hooks.has_after(packet.name()).then(|| packet.clone());

        tracing::trace!(packet = packet.name(), origin = %packet.origin(), %session, "dispatch");
        handler.dispatch(core, session, packet).await?;

        if let Some(packet) = observed {
            self.hooks.run_after(session, &packet);
        }
        Ok(())
    }
}

impl<S: Store> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

async fn check_requirement<S: Store>(
    core: &Core<S>,
    session: &SessionLike,
    requirement: Requirement,
) -> Result<(), DispatchError> {
    let permission = match requirement {
        Requirement::None => return Ok(()),
        Requirement::Authenticated => None,
        Requirement::Permission(p) => Some(p),
    };

    let user_id = session.user_id().ok_or(DispatchError::UnauthenticatedAccess)?;
    let Some(permission) = permission else {
        return Ok(());
    };

    let user = core
        .store()
        .get::<User>(&user_id)
        .await?
        .ok_or(DispatchError::UnauthenticatedAccess)?;
    let granted = match user.group_id {
        Some(group_id) => core
            .store()
            .get::<Group>(&group_id)
            .await?
            .is_some_and(|group| group.grants(permission)),
        None => false,
    };

    if granted {
        Ok(())
    } else {
        tracing::warn!(%session, permission, "permission denied");
        Err(DispatchError::UnauthorizedAction(NOT_PERMITTED.to_owned()))
    }
}
