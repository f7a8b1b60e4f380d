//! Trigger registration and reverse lookup for the switchyard execution
//! core.
//!
//! Deployed workflows register their trigger nodes here under normalized
//! index keys, so an incoming event finds its candidate workflows with a
//! map lookup instead of a scan.

pub mod index;

pub use index::{
    DeploymentStatus, TriggerIndex, TriggerKind, TriggerRegistration, normalize_index_key,
};
