use apollo_protocol::{Origin, Packet, PacketKind};
use apollo_session::Store;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::typed;
use crate::{Core, DispatchError, PacketHandler, Requirement, SessionLike};

/// Logs a session out, or tells clients that a user logged out.
///
/// From a client, `msg` is the user's parting message. Over the inter
/// channel it is the reason for a forced logout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl PacketKind for Logout {
    const NAME: &'static str = "logout";
}

impl Logout {
    pub fn with_message(msg: impl Into<String>) -> Self {
        Self {
            username: None,
            msg: Some(msg.into()),
        }
    }

    pub fn announce(username: impl Into<String>, msg: Option<&str>) -> Self {
        Self {
            username: Some(username.into()),
            msg: msg.map(str::to_owned),
        }
    }
}

pub struct LogoutHandler;

impl<S: Store> PacketHandler<S> for LogoutHandler {
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
            let logout: Logout = typed(&packet)?;

            let reason = match packet.origin() {
                Origin::Inter => logout.msg.unwrap_or_else(|| "Reason unknown".to_owned()),
                Origin::External => format!(
                    "User logout: {}",
                    logout.msg.as_deref().unwrap_or("(no reason given)")
                ),
            };

            let tokens = match session {
                SessionLike::Live { token, .. } => vec![token.clone()],
                SessionLike::Remote(user_id) => core.local_tokens_of(*user_id).await,
            };
            for token in &tokens {
                core.shutdown_transport(token, &reason).await;
            }
            Ok(())
        })
    }
}
