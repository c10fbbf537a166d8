use apollo_protocol::{Packet, PacketKind};
use apollo_session::{Store, User, UserFilter};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::IntoPacket;
use crate::{Core, DispatchError, PacketHandler, Requirement, SessionLike};

/// Asks for, or lists, the users currently online.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Online {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
}

impl PacketKind for Online {
    const NAME: &'static str = "online";
}

pub struct OnlineHandler;

impl<S: Store> PacketHandler<S> for OnlineHandler {
    fn requirement(&self) -> Requirement {
        Requirement::Authenticated
    }

    fn dispatch<'a>(
        &'a self,
        core: &'a Core<S>,
        session: &'a SessionLike,
        _packet: Packet,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            let mut users: Vec<String> = core
                .store()
                .find::<User>(&UserFilter::online())
                .await?
                .into_iter()
                .map(|user| user.name)
                .collect();
            users.sort();

            let reply = Online { users: Some(users) };
            core.bus().publish(&session.reply_to(), &reply.into_packet()).await?;
            Ok(())
        })
    }
}
