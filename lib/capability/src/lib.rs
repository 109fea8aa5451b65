//! Pluggable capabilities for the amber-relay assistant.
//!
//! A capability is a unit that takes a text command and optionally returns
//! text. Capabilities are described by a [`CapabilityManifest`] declaring
//! identity, accepted intents, trigger phrases, ports, and configuration
//! schema. The [`CapabilityRegistry`] discovers providers, resolves and
//! validates their manifests, and supports hot-reload without dropping the
//! previous instance until its replacement passes validation.

pub mod error;
pub mod manifest;
pub mod provider;
pub mod registry;

pub use error::CapabilityError;
pub use manifest::{CapabilityManifest, ConfigFieldSpec, PortSpec};
pub use provider::{Capability, CapabilityProvider};
pub use registry::{
    CapabilityDiagnostics, CapabilityRegistry, ManifestCoverage, ManifestSource, RegistryEntry,
};
