//! Before/after interceptors around packet dispatch.
//!
//! Hooks are registered per packet name when the server is built and run
//! in registration order. A before-hook can veto the packet by returning
//! the message the client should see; after-hooks only observe.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_protocol::Packet;

use crate::SessionLike;

pub type BeforeHook = Arc<dyn Fn(&SessionLike, &Packet) -> Result<(), String> + Send + Sync>;
pub type AfterHook = Arc<dyn Fn(&SessionLike, &Packet) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    before: HashMap<String, Vec<BeforeHook>>,
    after: HashMap<String, Vec<AfterHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook that runs before packets named `name` are handled.
    pub fn before<F>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn(&SessionLike, &Packet) -> Result<(), String> + Send + Sync + 'static,
    {
        self.before.entry(name.to_owned()).or_default().push(Arc::new(hook));
        self
    }

    /// Adds a hook that runs after packets named `name` were handled
    /// successfully.
    pub fn after<F>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn(&SessionLike, &Packet) + Send + Sync + 'static,
    {
        self.after.entry(name.to_owned()).or_default().push(Arc::new(hook));
        self
    }

    /// Runs the before-hooks; the first veto stops the chain.
    pub fn run_before(&self, session: &SessionLike, packet: &Packet) -> Result<(), String> {
        self.before
            .get(packet.name())
            .into_iter()
            .flatten()
            .try_for_each(|hook| hook(session, packet))
    }

    pub fn run_after(&self, session: &SessionLike, packet: &Packet) {
        for hook in self.after.get(packet.name()).into_iter().flatten() {
            hook(session, packet);
        }
    }

    pub fn has_after(&self, name: &str) -> bool {
        self.after.get(name).is_some_and(|hooks| !hooks.is_empty())
    }
}
