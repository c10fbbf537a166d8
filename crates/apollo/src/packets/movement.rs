use apollo_protocol::{Destination, LocationId, Packet, PacketKind, Scope, private_queue};
use apollo_session::{Session, SessionFilter, Store, User};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{Info, IntoPacket, typed};
use crate::{Core, DispatchError, PacketHandler, Requirement, SessionLike};

/// Moves the user to another location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub location: LocationId,
}

impl PacketKind for Move {
    const NAME: &'static str = "move";
}

pub struct MoveHandler;

impl<S: Store> PacketHandler<S> for MoveHandler {
    fn requirement(&self) -> Requirement {
        Requirement::Authenticated
    }

    fn dispatch<'a>(
        &'a self,
        core: &'a Core<S>,
        session: &'a SessionLike,
        packet: Packet,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            let Move { location } = typed::<Move>(&packet)?;
            let user_id = session.user_id().ok_or(DispatchError::UnauthenticatedAccess)?;
            let mut old = location;
            let user = core
                .store()
                .update::<User, _>(&user_id, |u| {
                    old = u.location_id;
                    u.location_id = location;
                })
                .await?
                .ok_or(DispatchError::UnauthenticatedAccess)?;
            core.store().flush().await?;

            if old != location {
                let from = Destination::ex(Scope::Location(old));
                let to = Destination::ex(Scope::Location(location));
                let sessions = core
                    .store()
                    .find::<Session>(&SessionFilter::by_user(user.id))
                    .await?;
                for s in &sessions {
                    let queue = private_queue(&s.token);
                    if let Err(e) = core.bus().rebind_queue(&queue, &from, &to).await {
                        tracing::warn!(%queue, error = %e, "location binding not moved");
                    }
                }

                // Whoever is at either end needs a fresh picture.
                let request = Info::default().into_packet();
                core.publish_logged(&Destination::inter(Scope::Location(location)), &request)
                    .await;
                core.publish_logged(&Destination::inter(Scope::Location(old)), &request)
                    .await;
                tracing::debug!(user = %user.name, from = %old, to = %location, "user moved");
            }

            let info = Info::describe(core, &user).await?;
            core.bus().publish(&session.reply_to(), &info.into_packet()).await?;
            Ok(())
        })
    }
}
