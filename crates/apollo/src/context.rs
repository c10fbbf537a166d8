//! The server core: the context object every component receives.
//!
//! [`Core`] owns the store handle, the bus, the dispatcher and the session
//! registry of this process. It is built once at startup and shared as
//! `Arc<Core<S>>` by the HTTP handlers, the inter listener and the reaper.
//!
//! The registry is only mutated through [`create_transport`] and
//! [`lose_transport`]; its lock is never held across an await.
//!
//! [`create_transport`]: Core::create_transport
//! [`lose_transport`]: Core::lose_transport

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::SystemTime;

use apollo_bus::{Bus, BusError, Consumer, session_binding};
use apollo_protocol::{
    Destination, Origin, Packet, ProtocolError, Scope, SessionToken, UserId, private_queue,
};
use apollo_session::{Session, SessionFilter, SessionRegistry, Store, User, generate_token};
use apollo_transport::{BindOutcome, PollResponder, Transport};
use tokio::sync::Mutex;

use crate::packets::{IntoPacket, Logout};
use crate::{ApolloError, DispatchError, Dispatcher, ServerConfig, SessionLike};

pub type LiveTransport = Transport<PollResponder>;

pub struct Core<S: Store> {
    config: ServerConfig,
    store: Arc<S>,
    bus: Bus,
    dispatcher: Dispatcher<S>,
    transports: Mutex<SessionRegistry<PollResponder>>,
    logins: StdMutex<HashSet<UserId>>,
}

/// Marks a login in flight for one user; cleared on drop.
pub(crate) struct LoginGuard<'a> {
    logins: &'a StdMutex<HashSet<UserId>>,
    user_id: UserId,
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        let mut logins = self.logins.lock().unwrap_or_else(|e| e.into_inner());
        logins.remove(&self.user_id);
    }
}

impl<S: Store> Core<S> {
    pub fn new(config: ServerConfig, store: Arc<S>, bus: Bus, dispatcher: Dispatcher<S>) -> Self {
        Self {
            config,
            store,
            bus,
            dispatcher,
            transports: Mutex::new(SessionRegistry::new()),
            logins: StdMutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Opens a new, unauthenticated session on this process.
    ///
    /// Saves the session record, registers a transport for it and declares
    /// its private queue bound to `ex.session.<token>`, so replies sent
    /// before the first events request are kept.
    pub async fn create_transport(&self) -> Result<Arc<LiveTransport>, ApolloError> {
        let token = generate_token();
        self.store
            .save(Session::new(token.clone(), SystemTime::now()))
            .await?;
        self.store.flush().await?;

        let queue = private_queue(&token);
        self.bus.declare_queue(&queue).await?;
        self.bus.bind_queue(&queue, &session_binding(&token)).await?;

        let transport = Arc::new(Transport::new(token.clone()));
        self.transports.lock().await.create(transport.clone())?;
        tracing::info!(%token, "session created");
        Ok(transport)
    }

    pub async fn transport(&self, token: &SessionToken) -> Option<Arc<LiveTransport>> {
        self.transports.lock().await.get(token)
    }

    /// Deregisters a transport without shutting it down.
    pub async fn lose_transport(&self, token: &SessionToken) -> Option<Arc<LiveTransport>> {
        self.transports.lock().await.lose(token)
    }

    /// Local tokens whose session belongs to `user_id`.
    pub async fn local_tokens_of(&self, user_id: UserId) -> Vec<SessionToken> {
        let sessions = match self.store.find::<Session>(&SessionFilter::by_user(user_id)).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(user = %user_id, error = %e, "session lookup failed");
                return Vec::new();
            }
        };
        let transports = self.transports.lock().await;
        sessions
            .into_iter()
            .map(|s| s.token)
            .filter(|token| transports.contains(token))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Terminates a local transport.
    ///
    /// Deregisters it, cancels its consumer, answers a parked request with a
    /// logout packet carrying `reason`, then retires the session. Returns
    /// `false` if no transport was registered under `token`.
    pub async fn shutdown_transport(&self, token: &SessionToken, reason: &str) -> bool {
        let Some(transport) = self.lose_transport(token).await else {
            return false;
        };

        let farewell = Logout::with_message(reason).into_packet();
        transport.close(Some(farewell)).await;
        self.retire_session(token, reason).await;

        tracing::info!(%token, reason, "transport shut down");
        true
    }

    /// Removes what a session leaves behind: its record, its private queue
    /// and, if it was the user's last session, the user's online flag.
    ///
    /// Every step runs even when an earlier one failed.
    pub async fn retire_session(&self, token: &SessionToken, reason: &str) {
        let session = match self.store.get::<Session>(token).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(%token, error = %e, "session lookup failed during teardown");
                None
            }
        };

        if let Err(e) = self
            .store
            .remove::<Session>(&SessionFilter::by_token(token.clone()))
            .await
        {
            tracing::warn!(%token, error = %e, "session record not removed");
        }

        if let Err(e) = self.bus.delete_queue(&private_queue(token)).await {
            tracing::warn!(%token, error = %e, "private queue not deleted");
        }

        if let Some(user_id) = session.and_then(|s| s.user_id) {
            self.user_left(user_id, reason).await;
        }

        if let Err(e) = self.store.flush().await {
            tracing::warn!(%token, error = %e, "store flush failed");
        }
    }

    /// Marks a user offline once no session of theirs is left, and tells
    /// everyone.
    async fn user_left(&self, user_id: UserId, reason: &str) {
        match self.store.find::<Session>(&SessionFilter::by_user(user_id)).await {
            Ok(remaining) if !remaining.is_empty() => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user = %user_id, error = %e, "session lookup failed during teardown");
                return;
            }
        }

        let mut was_online = false;
        let user = match self
            .store
            .update::<User, _>(&user_id, |u| {
                was_online = u.online;
                u.online = false;
            })
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(user = %user_id, error = %e, "user not marked offline");
                return;
            }
        };

        if was_online {
            let broadcast = Logout::announce(&user.name, Some(reason)).into_packet();
            self.publish_logged(&Destination::ex(Scope::Global), &broadcast).await;
            tracing::info!(user = %user.name, reason, "user logged out");
        }
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Records activity on a session and returns it.
    ///
    /// Only `last_active` is written, so a login landing at the same time
    /// keeps its user binding.
    pub async fn touch(&self, token: &SessionToken) -> Result<Session, DispatchError> {
        let now = SystemTime::now();
        self.store
            .update::<Session, _>(token, |session| session.touch(now))
            .await?
            .ok_or_else(|| DispatchError::SessionNotFound(token.clone()))
    }

    /// Handles a packet submitted through the action endpoint.
    ///
    /// Unknown packet names are dropped. A malformed payload is answered
    /// with an error packet to the session and returned as
    /// `MalformedPacket`.
    pub async fn handle_action(&self, token: &SessionToken, payload: &[u8]) -> Result<(), DispatchError> {
        let session = self.touch(token).await.inspect_err(|_| {
            tracing::warn!(%token, "action for unknown session");
        })?;
        let like = SessionLike::Live {
            token: token.clone(),
            user_id: session.user_id,
        };

        let packet = match self.dispatcher.decode(payload) {
            Ok(packet) => packet.tagged(Origin::External),
            Err(ProtocolError::UnknownPacketType(name)) => {
                tracing::debug!(%token, packet = %name, "unknown packet type dropped");
                return Ok(());
            }
            Err(e) => {
                let err = DispatchError::MalformedPacket(e);
                self.report(&like, &err).await;
                return Err(err);
            }
        };

        self.dispatch(&like, packet).await
    }

    /// Dispatches a packet and reports a failure back to the session.
    pub async fn dispatch(&self, session: &SessionLike, packet: Packet) -> Result<(), DispatchError> {
        let name = packet.name().to_owned();
        let result = self.dispatcher.dispatch(self, session, packet).await;
        if let Err(e) = &result {
            tracing::debug!(%session, packet = %name, error = %e, "dispatch failed");
            self.report(session, e).await;
        }
        result
    }

    async fn report(&self, session: &SessionLike, error: &DispatchError) {
        match error.reply_packet() {
            Some(reply) => self.publish_logged(&session.reply_to(), &reply).await,
            None => tracing::warn!(%session, error = %error, "dispatch error"),
        }
    }

    /// Parks an events request on the session's transport.
    ///
    /// If a packet was queued it is written at once; otherwise a consumer
    /// starts feeding the parked request.
    pub async fn handle_events(
        &self,
        token: &SessionToken,
        responder: PollResponder,
    ) -> Result<BindOutcome, DispatchError> {
        let Some(transport) = self.transport(token).await else {
            tracing::warn!(%token, "events request for unknown transport");
            return Err(DispatchError::SessionNotFound(token.clone()));
        };
        self.touch(token).await?;

        let outcome = transport.bind(responder).await?;
        if outcome == BindOutcome::Parked {
            Consumer::new(self.bus.clone(), self.store.clone(), transport)
                .eat()
                .await
                .map_err(|e| match e {
                    BusError::SessionNotFound(token) => DispatchError::SessionNotFound(token),
                    other => DispatchError::Bus(other),
                })?;
        }
        Ok(outcome)
    }

    /// Called when an events request ends.
    ///
    /// `clean` is `false` when the client went away while its request was
    /// still parked. An authenticated session then announces the user's
    /// departure; the session itself stays until logout or the reaper.
    pub async fn on_connection_close(&self, token: &SessionToken, clean: bool) {
        if clean {
            tracing::trace!(%token, "events request finished");
            return;
        }

        let user = match self.store.get::<Session>(token).await {
            Ok(Some(Session {
                user_id: Some(user_id),
                ..
            })) => self.store.get::<User>(&user_id).await.ok().flatten(),
            _ => None,
        };
        tracing::info!(%token, authenticated = user.is_some(), "client disconnected");

        if let Some(user) = user {
            let announce = Logout::announce(&user.name, None).into_packet();
            self.publish_logged(&Destination::ex(Scope::Global), &announce).await;
        }
    }

    // -----------------------------------------------------------------------
    // Helpers for packet handlers
    // -----------------------------------------------------------------------

    /// Publishes, logging instead of failing.
    pub async fn publish_logged(&self, destination: &Destination, packet: &Packet) {
        if let Err(e) = self.bus.publish(destination, packet).await {
            tracing::warn!(%destination, packet = packet.name(), error = %e, "publish failed");
        }
    }

    /// Claims the login slot of a user. `None` if a login for that user is
    /// already running on this process.
    pub(crate) fn begin_login(&self, user_id: UserId) -> Option<LoginGuard<'_>> {
        let mut logins = self.logins.lock().unwrap_or_else(|e| e.into_inner());
        logins.insert(user_id).then_some(LoginGuard {
            logins: &self.logins,
            user_id,
        })
    }

    pub async fn user(&self, user_id: UserId) -> Result<Option<User>, DispatchError> {
        Ok(self.store.get::<User>(&user_id).await?)
    }

    /// The user a session acts for.
    ///
    /// # Errors
    /// `UnauthenticatedAccess` if there is none or it no longer exists.
    pub async fn require_user(&self, session: &SessionLike) -> Result<User, DispatchError> {
        let user_id = session.user_id().ok_or(DispatchError::UnauthenticatedAccess)?;
        self.user(user_id)
            .await?
            .ok_or(DispatchError::UnauthenticatedAccess)
    }
}
