//! In-process eventing for the amber-relay assistant.
//!
//! This crate provides the publish/subscribe spine of the runtime:
//! - [`EventRecord`]: an immutable domain event with topic, payload, and source.
//! - [`Condition`]: a parsed boolean expression evaluated against an event.
//! - [`EventFilter`]: a topic pattern plus optional condition.
//! - [`EventBus`]: synchronous fan-out with glob topic matching and bounded history.
//! - [`EventQueue`]: a bounded drop-oldest queue decoupling producers from a
//!   single consumer.

pub mod bus;
pub mod condition;
pub mod error;
pub mod event;
pub mod filter;
pub mod queue;

pub use bus::EventBus;
pub use condition::{CompareOp, Condition, Literal};
pub use error::ConditionError;
pub use event::EventRecord;
pub use filter::EventFilter;
pub use queue::EventQueue;
