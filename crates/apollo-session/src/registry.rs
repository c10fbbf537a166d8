//! The session registry: which transports live on this process.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is NOT thread-safe by itself; it is a plain
//! `HashMap`. The server core owns it behind a mutex and only ever touches
//! it through `create_transport` / `lose_transport`, never holding the lock
//! across an await.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_protocol::SessionToken;
use apollo_transport::{Handler, Transport};
use rand::Rng;

use crate::SessionError;

/// Maps connection tokens to live transports.
///
/// ```text
/// GET /session ──→ create() ──→ [registered] ──→ lose() on logout/kick/reap
/// ```
pub struct SessionRegistry<H: Handler> {
    transports: HashMap<SessionToken, Arc<Transport<H>>>,
}

impl<H: Handler> SessionRegistry<H> {
    pub fn new() -> Self {
        Self {
            transports: HashMap::new(),
        }
    }

    /// Registers a transport under its token.
    ///
    /// # Errors
    /// [`SessionError::AlreadyRegistered`] if the token is taken; the
    /// existing transport is left untouched.
    pub fn create(&mut self, transport: Arc<Transport<H>>) -> Result<(), SessionError> {
        let token = transport.token().clone();
        if self.transports.contains_key(&token) {
            return Err(SessionError::AlreadyRegistered(token));
        }
        tracing::debug!(%token, "transport registered");
        self.transports.insert(token, transport);
        Ok(())
    }

    /// Deregisters a transport. Returns it if it was registered.
    pub fn lose(&mut self, token: &SessionToken) -> Option<Arc<Transport<H>>> {
        let lost = self.transports.remove(token);
        if lost.is_some() {
            tracing::debug!(%token, "transport deregistered");
        }
        lost
    }

    pub fn get(&self, token: &SessionToken) -> Option<Arc<Transport<H>>> {
        self.transports.get(token).cloned()
    }

    pub fn contains(&self, token: &SessionToken) -> bool {
        self.transports.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

impl<H: Handler> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates a fresh connection token: 16 random bytes as 32 hex chars.
pub fn generate_token() -> SessionToken {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    SessionToken(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use apollo_transport::PollResponder;

    use super::*;

    fn transport(token: &str) -> Arc<Transport<PollResponder>> {
        Arc::new(Transport::new(SessionToken::from(token)))
    }

    #[test]
    fn test_create_and_get() {
        let mut registry = SessionRegistry::new();
        registry.create(transport("a")).unwrap();
        assert!(registry.contains(&SessionToken::from("a")));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&SessionToken::from("b")).is_none());
    }

    #[test]
    fn test_create_rejects_double_registration() {
        let mut registry = SessionRegistry::new();
        let first = transport("a");
        registry.create(first.clone()).unwrap();

        let result = registry.create(transport("a"));
        assert!(matches!(result, Err(SessionError::AlreadyRegistered(_))));

        let kept = registry.get(&SessionToken::from("a")).unwrap();
        assert!(Arc::ptr_eq(&kept, &first));
    }

    #[test]
    fn test_lose_twice_returns_none() {
        let mut registry = SessionRegistry::new();
        registry.create(transport("a")).unwrap();
        assert!(registry.lose(&SessionToken::from("a")).is_some());
        assert!(registry.lose(&SessionToken::from("a")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_generate_token_format() {
        let token = generate_token();
        assert_eq!(token.as_str().len(), 32);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }
}
