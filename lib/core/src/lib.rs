//! Core domain types and utilities for the amber-relay platform.
//!
//! This crate provides the foundational types and error handling used
//! throughout the amber-relay assistant's workflow core.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EventId, ParseIdError, RunId, SubscriptionId};
