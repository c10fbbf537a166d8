use apollo_protocol::{LocationId, Packet, PacketKind};
use apollo_session::{Store, User, UserFilter};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::IntoPacket;
use crate::{Core, DispatchError, PacketHandler, Requirement, SessionLike};

/// Asks for, or describes, what is at the user's location.
///
/// An empty `info` is a request. Other servers send one over
/// `inter.loc.<id>` when the set of users there changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationId>,
    /// Names of the other online users at `location`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub things: Option<Vec<String>>,
}

impl PacketKind for Info {
    const NAME: &'static str = "info";
}

impl Info {
    /// Describes the location `user` stands in.
    pub(crate) async fn describe<S: Store>(core: &Core<S>, user: &User) -> Result<Self, DispatchError> {
        let filter = UserFilter::online().at_location(user.location_id);
        let mut things: Vec<String> = core
            .store()
            .find::<User>(&filter)
            .await?
            .into_iter()
            .filter(|other| other.id != user.id)
            .map(|other| other.name)
            .collect();
        things.sort();

        Ok(Self {
            location: Some(user.location_id),
            things: Some(things),
        })
    }
}

pub struct InfoHandler;

impl<S: Store> PacketHandler<S> for InfoHandler {
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
            let user = core.require_user(session).await?;
            let info = Info::describe(core, &user).await?;
            core.bus().publish(&session.reply_to(), &info.into_packet()).await?;
            Ok(())
        })
    }
}
