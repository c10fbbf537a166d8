//! Session management for Apollo.
//!
//! This crate covers who is connected and who they are:
//!
//! 1. **Records**: [`Session`], [`User`], [`Group`] and their filters.
//! 2. **Store**: the [`Store`] interface persistence must provide, and
//!    [`MemoryStore`] for tests and single-process setups.
//! 3. **Credentials**: password hashes and the nonce challenge.
//! 4. **Registry**: [`SessionRegistry`], the per-process map from tokens
//!    to live transports.
//!
//! # How it fits in the stack
//!
//! ```text
//! Bus Layer (above)        ← looks sessions up to decide what to subscribe
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Transport / Protocol (below) ← Transport, SessionToken, UserId
//! ```

pub mod credentials;
mod error;
mod registry;
mod session;
mod store;
mod user;

pub use error::{SessionError, StoreError};
pub use registry::{SessionRegistry, generate_token};
pub use session::{Session, SessionFilter};
pub use store::{MemoryStore, Record, Store};
pub use user::{Group, User, UserFilter};
