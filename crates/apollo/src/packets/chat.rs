use apollo_protocol::{Destination, Packet, PacketKind, Scope};
use apollo_session::{Store, User, UserFilter};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{ErrorPacket, IntoPacket, Severity, typed};
use crate::{Core, DispatchError, PacketHandler, Requirement, SessionLike};

/// A chat message.
///
/// Without `target` it goes to everyone. `origin` is filled in by the
/// server with the sender's name; whatever a client puts there is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default)]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl PacketKind for Chat {
    const NAME: &'static str = "chat";
}

pub struct ChatHandler;

impl<S: Store> PacketHandler<S> for ChatHandler {
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
            let chat: Chat = typed(&packet)?;
            if chat.msg.trim().is_empty() {
                return Ok(());
            }
            let sender = core.require_user(session).await?;

            let Some(target) = chat.target else {
                let out = Chat {
                    msg: chat.msg,
                    target: None,
                    origin: Some(sender.name),
                };
                core.bus()
                    .publish(&Destination::ex(Scope::Global), &out.into_packet())
                    .await?;
                return Ok(());
            };

            let Some(recipient) = online_target(core, session, &target).await? else {
                return Ok(());
            };
            let out = Chat {
                msg: chat.msg,
                target: Some(target),
                origin: Some(sender.name),
            }
            .into_packet();
            core.bus()
                .publish(&Destination::ex(Scope::User(recipient.id)), &out)
                .await?;
            core.bus()
                .publish(&Destination::ex(Scope::User(sender.id)), &out)
                .await?;
            Ok(())
        })
    }
}

/// Resolves a user named by a client.
///
/// An unknown or offline user is reported to `session` with a warning and
/// yields `None`.
pub(super) async fn online_target<S: Store>(
    core: &Core<S>,
    session: &SessionLike,
    name: &str,
) -> Result<Option<User>, DispatchError> {
    let found = core
        .store()
        .find::<User>(&UserFilter::named(name))
        .await?
        .into_iter()
        .next();

    let problem = match &found {
        None => "User does not exist.",
        Some(user) if !user.online => "User is not online.",
        Some(_) => return Ok(found),
    };
    let warning = ErrorPacket::new(Severity::Warn, problem).into_packet();
    core.bus().publish(&session.reply_to(), &warning).await?;
    Ok(None)
}
