//! Long-poll transport layer for Apollo.
//!
//! A browser never holds a connection open for long. It sends an events
//! request, the server parks it until one packet is ready (or a timeout),
//! and the browser immediately asks again. This crate provides:
//!
//! - [`Transport`]: the per-session object that bridges those requests,
//!   queueing packets while no request is parked.
//! - [`Handler`] and [`PollResponder`]: a parked request that accepts
//!   exactly one payload.
//! - [`CancelHandle`]: how a transport stops the consumer feeding it.

mod cancel;
mod error;
mod handler;
mod transport;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use error::TransportError;
pub use handler::{ConnectionId, Handler, PendingPoll, PollResponder, long_poll};
pub use transport::{BindOutcome, SendOutcome, Transport, TransportState, generate_nonce};
