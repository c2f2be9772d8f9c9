//! Access control
//!
//! The deny-list policy, the policy-checked type resolver and the
//! policy-checked cluster operations built on both.

pub mod mapper;
pub mod policy;
pub mod resources;

pub use mapper::{AccessControlMapper, GroupKind, KindResolver, ResourceRef, RestMapping};
pub use policy::{is_allowed, AccessPolicy};
pub use resources::ResourceClient;
