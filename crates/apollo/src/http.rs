//! The long-poll HTTP surface.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /session` | open a session; answers `{"s": token, "n": nonce}` |
//! | `POST /action` | submit a packet (`s` = token, `p` = packet JSON, form encoded) |
//! | `GET /events?s=` | wait for the next packet for the session |
//!
//! An events request is answered with exactly one packet, or with
//! `204 No Content` once the poll timeout passes.

use std::sync::Arc;

use apollo_protocol::SessionToken;
use apollo_session::Store;
use apollo_transport::long_poll;
use axum::extract::{Form, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::{ApolloError, Core, DispatchError};

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Session token.
    pub s: String,
    /// Server nonce for the login challenge.
    pub n: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionForm {
    pub s: String,
    pub p: String,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub s: String,
}

/// Builds the router over a shared core.
pub fn router<S: Store>(core: Arc<Core<S>>) -> Router {
    Router::new()
        .route("/session", get(open_session::<S>))
        .route("/action", post(action::<S>))
        .route("/events", get(events::<S>))
        .with_state(core)
}

/// GET /session
async fn open_session<S: Store>(State(core): State<Arc<Core<S>>>) -> Response {
    if let Err(e) = core.bus().ensure_ready() {
        tracing::warn!(error = %e, "session refused");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match core.create_transport().await {
        Ok(transport) => Json(SessionResponse {
            s: transport.token().as_str().to_owned(),
            n: transport.nonce().to_owned(),
        })
        .into_response(),
        Err(ApolloError::Bus(e)) => {
            tracing::warn!(error = %e, "session not created");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "session not created");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /action
async fn action<S: Store>(State(core): State<Arc<Core<S>>>, Form(form): Form<ActionForm>) -> StatusCode {
    let token = SessionToken::new(form.s);
    match core.handle_action(&token, form.p.as_bytes()).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => status_for(&e),
    }
}

/// GET /events
async fn events<S: Store>(State(core): State<Arc<Core<S>>>, Query(query): Query<EventsQuery>) -> Response {
    let token = SessionToken::new(query.s);
    let (responder, pending) = long_poll();

    if let Err(e) = core.handle_events(&token, responder).await {
        return status_for(&e).into_response();
    }

    let mut guard = PollGuard {
        core: core.clone(),
        token,
        clean: false,
    };
    let payload = pending.wait_timeout(core.config().poll_timeout).await;
    guard.clean = true;

    match payload {
        Some(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Reports the end of an events request. If the request future is
/// dropped before an answer was produced, the client went away.
struct PollGuard<S: Store> {
    core: Arc<Core<S>>,
    token: SessionToken,
    clean: bool,
}

impl<S: Store> Drop for PollGuard<S> {
    fn drop(&mut self) {
        let core = self.core.clone();
        let token = self.token.clone();
        let clean = self.clean;
        tokio::spawn(async move {
            core.on_connection_close(&token, clean).await;
        });
    }
}

fn status_for(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::MalformedPacket(_) => StatusCode::BAD_REQUEST,
        // Already answered with an error packet on the session.
        DispatchError::UnauthenticatedAccess | DispatchError::UnauthorizedAction(_) => {
            StatusCode::NO_CONTENT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use apollo_bus::BusError;
    use apollo_protocol::ProtocolError;

    use super::*;

    #[test]
    fn test_status_for_dispatch_errors() {
        assert_eq!(
            status_for(&DispatchError::SessionNotFound(SessionToken::new("t"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&DispatchError::Bus(BusError::BrokerUnavailable)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&DispatchError::MalformedPacket(ProtocolError::InvalidMessage("x".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&DispatchError::UnauthenticatedAccess), StatusCode::NO_CONTENT);
        assert_eq!(
            status_for(&DispatchError::Bus(BusError::QueueNotFound("q".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
