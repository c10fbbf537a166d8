use apollo_bus::bind_login_topology;
use apollo_protocol::{Destination, PacketKind, Packet, Scope, SessionToken, private_queue};
use apollo_session::{Session, SessionFilter, Store, User, UserFilter, credentials};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{IntoPacket, Logout, typed};
use crate::{Core, DispatchError, PacketHandler, SessionLike};

/// Logs a session in, or tells clients that a user logged in.
///
/// Client to server it carries `username`, the challenge response in
/// `pwhash` and the client `nonce`. Server to client, `username` names who
/// logged in and is absent on the reply to the session itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwhash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl PacketKind for Login {
    const NAME: &'static str = "login";
}

impl Login {
    pub fn announce(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }
}

pub struct LoginHandler;

impl<S: Store> PacketHandler<S> for LoginHandler {
    fn dispatch<'a>(
        &'a self,
        core: &'a Core<S>,
        session: &'a SessionLike,
        packet: Packet,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            let SessionLike::Live { token, user_id } = session else {
                tracing::debug!(%session, "login without a live session ignored");
                return Ok(());
            };
            if user_id.is_some() {
                return Err(DispatchError::UnauthorizedAction("Already logged in.".to_owned()));
            }
            let login: Login = typed(&packet)?;
            login_session(core, token, login).await
        })
    }
}

async fn login_session<S: Store>(
    core: &Core<S>,
    token: &SessionToken,
    login: Login,
) -> Result<(), DispatchError> {
    let reply_to = Destination::ex(Scope::Session(token.clone()));
    let transport = core
        .transport(token)
        .await
        .ok_or_else(|| DispatchError::SessionNotFound(token.clone()))?;

    let Some(user) = authenticate(core, transport.nonce(), &login).await? else {
        tracing::warn!(%token, username = ?login.username, "rejected credentials");
        let rejection = Logout::with_message("Bad credentials").into_packet();
        core.publish_logged(&reply_to, &rejection).await;
        return Ok(());
    };

    let Some(_guard) = core.begin_login(user.id) else {
        tracing::warn!(%token, user = %user.name, "concurrent login rejected");
        let rejection = Logout::with_message("Session clash").into_packet();
        core.publish_logged(&reply_to, &rejection).await;
        return Ok(());
    };

    let earlier = core
        .store()
        .find::<Session>(&SessionFilter::by_user(user.id))
        .await?;

    core.store()
        .update::<Session, _>(token, |record| record.user_id = Some(user.id))
        .await?
        .ok_or_else(|| DispatchError::SessionNotFound(token.clone()))?;
    core.store().flush().await?;

    // Earlier sessions are shut down by whichever process holds them. The
    // new session is already bound, so the user never looks offline.
    for old in earlier.iter().filter(|s| &s.token != token) {
        let evict = Logout::with_message("Coexistence not permitted").into_packet();
        core.publish_logged(&Destination::inter(Scope::Session(old.token.clone())), &evict)
            .await;
    }

    let stages = bind_login_topology(core.bus(), &private_queue(token), &user).await?;
    tracing::debug!(%token, ?stages, "login bindings in place");

    core.bus().publish(&reply_to, &Login::default().into_packet()).await?;
    core.bus()
        .publish(
            &Destination::ex(Scope::Global),
            &Login::announce(&user.name).into_packet(),
        )
        .await?;

    core.store()
        .update::<User, _>(&user.id, |u| u.online = true)
        .await?;
    core.store().flush().await?;

    tracing::info!(%token, user = %user.name, "user logged in");
    Ok(())
}

/// The user the credentials belong to, if they check out.
async fn authenticate<S: Store>(
    core: &Core<S>,
    server_nonce: &str,
    login: &Login,
) -> Result<Option<User>, DispatchError> {
    let (Some(username), Some(pwhash), Some(nonce)) = (&login.username, &login.pwhash, &login.nonce)
    else {
        return Ok(None);
    };

    let user = core
        .store()
        .find::<User>(&UserFilter::named(username.as_str()))
        .await?
        .into_iter()
        .next();

    Ok(user.filter(|user| credentials::verify_challenge(&user.pwhash, server_nonce, nonce, pwhash)))
}
