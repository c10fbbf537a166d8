use apollo_protocol::{Destination, Packet, PacketKind, Scope};
use apollo_session::Store;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::chat::online_target;
use super::{IntoPacket, Logout, typed};
use crate::{Core, DispatchError, PacketHandler, Requirement, SessionLike};

/// Asks the server to kick a user. Client to server only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kick {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl PacketKind for Kick {
    const NAME: &'static str = "kick";
}

pub struct KickHandler;

impl<S: Store> PacketHandler<S> for KickHandler {
    fn requirement(&self) -> Requirement {
        Requirement::Permission("moderator.kick")
    }

    fn dispatch<'a>(
        &'a self,
        core: &'a Core<S>,
        session: &'a SessionLike,
        packet: Packet,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            let kick: Kick = typed(&packet)?;
            let Some(user) = online_target(core, session, &kick.target).await? else {
                return Ok(());
            };

            let reason = kick.msg.as_deref().unwrap_or("(no reason given)");
            let order = Logout::with_message(format!("Kicked by server: {reason}")).into_packet();
            core.bus()
                .publish(&Destination::inter(Scope::User(user.id)), &order)
                .await?;
            tracing::info!(%session, target = %user.name, reason, "user kicked");
            Ok(())
        })
    }
}
