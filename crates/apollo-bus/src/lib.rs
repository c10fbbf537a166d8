//! Message bus for Apollo.
//!
//! Every packet between sessions and between server processes travels
//! through a topic broker. This crate holds both sides of that:
//!
//! - [`BrokerHandle`] and [`BrokerCommand`]: the broker primitives, served
//!   by a single task per process. [`spawn_memory_broker`] starts the
//!   in-process implementation.
//! - [`Bus`]: publish, queue and binding management, and the inter
//!   listener ([`InterHandler`]).
//! - [`Consumer`]: the one-shot subscriber behind every long-poll.
//! - [`LoginBinding`] and the topology helpers: which destinations a
//!   session's queue is bound to, and in what order login binds them.

#![allow(async_fn_in_trait)]

mod broker;
mod bus;
mod config;
mod consumer;
mod error;
mod memory;
mod topic;
mod topology;

pub use broker::{
    BrokerCommand, BrokerHandle, ConsumerTag, Delivery, DeliveryTag, QueueInfo, QueueOptions,
    Subscription,
};
pub use bus::{Bus, InterHandler};
pub use config::BrokerConfig;
pub use consumer::Consumer;
pub use error::BusError;
pub use memory::spawn_memory_broker;
pub use topic::topic_matches;
pub use topology::{
    LoginBinding, bind_login_topology, consumer_bindings, session_binding, user_bindings,
};
