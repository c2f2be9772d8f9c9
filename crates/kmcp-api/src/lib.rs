//! kmcp gateway
//!
//! The trust boundary between MCP clients and a Kubernetes cluster:
//!
//! - [`auth`] decides whether an inbound call may proceed
//! - [`access`] filters every resource operation through the deny policy
//! - [`cluster`] derives caller-scoped clients from the base configuration
//! - [`reload`] rebuilds and republishes all of the above when the
//!   credential source changes
//!
//! [`server`] and [`rpc`] expose the tools in [`tools`] over HTTP.

#![deny(missing_docs)]

pub mod access;
pub mod auth;
pub mod cluster;
pub mod context;
pub mod error;
pub mod reload;
pub mod rpc;
pub mod server;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::{AuthError, Error, Result};
