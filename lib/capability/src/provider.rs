//! Capability trait boundary.

use crate::error::CapabilityError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// An executable capability: takes one text command, optionally returns text.
///
/// Implementations wrap whatever actually does the work (a vendor AI call, a
/// local routine, an external process); the engine treats them as opaque.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Handles one command.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] when the command cannot be handled. The
    /// engine records the error per node; it never propagates further.
    async fn invoke(&self, command: &str) -> Result<Option<String>, CapabilityError>;

    /// Called once after the capability is successfully loaded.
    ///
    /// A failure here is logged and does not fail the load.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] describing why initialization failed.
    async fn initialize(&self) -> Result<(), CapabilityError> {
        Ok(())
    }
}

/// A factory the registry discovers capabilities through.
///
/// Providers are the in-process analogue of a plugin directory: each one
/// names a capability, optionally carries an embedded manifest document,
/// and builds instances on demand.
pub trait CapabilityProvider: Send + Sync {
    /// Registry key for this capability.
    fn id(&self) -> &str;

    /// Embedded manifest declaration, if the capability carries one.
    ///
    /// Keys set here override the external manifest file.
    fn embedded_manifest(&self) -> Option<JsonValue> {
        None
    }

    /// Trigger phrases for providers predating manifests; used to build the
    /// legacy fallback manifest when no declaration resolves.
    fn legacy_triggers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Builds a fresh capability instance.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] when construction fails; the registry
    /// records the error text on the entry.
    fn instantiate(&self) -> Result<Arc<dyn Capability>, CapabilityError>;
}
