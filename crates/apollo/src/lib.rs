//! # Apollo
//!
//! Server core for a browser-based multiplayer game.
//!
//! Browsers talk to Apollo over long-poll HTTP. Every packet between
//! sessions, and between server processes, goes through a topic broker:
//!
//! ```text
//! POST /action → Core::handle_action → Dispatcher → PacketHandler
//!                                                     │ publish
//!                                                     ▼
//!                                                    Bus ──inter──▶ InterDispatcher
//!                                                     │ ex
//!                                                     ▼
//! GET /events ◀── Transport ◀── one-shot Consumer ◀── private queue
//! ```
//!
//! [`Core`] owns the store, the bus, the dispatcher and the registry of
//! live transports. [`ApolloServerBuilder`] wires it to the inter
//! listener, the session [`Reaper`] and the HTTP [`router`].

mod config;
mod context;
mod dispatch;
mod error;
mod hooks;
mod http;
mod inter;
pub mod packets;
mod reaper;
mod server;
mod session_like;

pub use config::{Cli, ServerConfig, generate_server_id};
pub use context::{Core, LiveTransport};
pub use dispatch::{Dispatcher, PacketHandler, Requirement};
pub use error::{ApolloError, DispatchError};
pub use hooks::{AfterHook, BeforeHook, Hooks};
pub use http::{SessionResponse, router};
pub use inter::InterDispatcher;
pub use reaper::Reaper;
pub use server::{ApolloServer, ApolloServerBuilder};
pub use session_like::SessionLike;
