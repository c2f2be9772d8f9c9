//! Cluster configuration, client sets and credential derivation

pub mod clients;
pub mod config;
pub mod view;

pub use clients::KubeClients;
pub use config::{derive_config, load_base_config, BaseConfig, CredentialSource};
pub use view::configuration_view;
