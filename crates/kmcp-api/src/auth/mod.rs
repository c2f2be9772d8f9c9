//! Authorization
//!
//! Claims decoding and offline checks, optional identity-provider
//! verification, the authoritative cluster token review, and the gate and
//! middleware that combine them.

pub mod claims;
pub mod gate;
pub mod middleware;
pub mod oidc;
pub mod token_review;

pub use claims::Claims;
pub use gate::{is_exempt, AuthGate, GateConfig};
pub use middleware::authorize_request;
pub use oidc::{IdentityProvider, OidcConfig, OidcVerifier};
pub use token_review::{KubeTokenReviewer, TokenReviewer};
