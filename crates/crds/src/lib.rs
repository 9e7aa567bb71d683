//! CRD definitions for the cloud network-policy controllers.
//!
//! Two resources drive the system:
//! - `CloudProviderAccount` binds a namespaced account to one public cloud
//!   (credential secret reference, region, poll interval).
//! - `CloudEntitySelector` selects which VPCs/VMs of an account are managed.

pub mod cloud_entity_selector;
pub mod cloud_provider_account;
pub mod references;

pub use cloud_entity_selector::*;
pub use cloud_provider_account::*;
pub use references::*;
