//! Cluster token review
//!
//! Submits the caller's raw token and the target audience to the cluster's
//! TokenReview API. The review is authoritative: an unauthenticated status,
//! a missing status or a transport error all reject the token.

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus};
use kube::{Api, Client};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::context::CallerIdentity;
use crate::error::AuthError;
use crate::reload::SnapshotCell;

/// Resolves a token to a caller identity via the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenReviewer: Send + Sync {
    /// Review `token` for `audience`
    async fn review(&self, token: &str, audience: &str) -> Result<CallerIdentity, AuthError>;
}

/// Submit a TokenReview with `client`
pub async fn review_with_client(
    client: Client,
    token: &str,
    audience: &str,
) -> Result<CallerIdentity, AuthError> {
    let api: Api<TokenReview> = Api::all(client);

    let token_review = TokenReview {
        metadata: Default::default(),
        spec: TokenReviewSpec {
            token: Some(token.to_string()),
            audiences: Some(vec![audience.to_string()]),
        },
        status: None,
    };

    let result = api
        .create(&Default::default(), &token_review)
        .await
        .map_err(|e| AuthError::ClusterReviewRejected(format!("TokenReview API error: {}", e)))?;

    let status = result
        .status
        .ok_or_else(|| AuthError::ClusterReviewRejected("TokenReview returned no status".into()))?;

    identity_from_status(&status)
}

/// Extract the caller identity from a TokenReview status
pub fn identity_from_status(status: &TokenReviewStatus) -> Result<CallerIdentity, AuthError> {
    if !status.authenticated.unwrap_or(false) {
        let error_msg = status
            .error
            .as_deref()
            .unwrap_or("token authentication failed");
        return Err(AuthError::ClusterReviewRejected(error_msg.to_string()));
    }

    let user = status.user.as_ref().ok_or_else(|| {
        AuthError::ClusterReviewRejected("TokenReview authenticated but no user info".into())
    })?;

    let username = user
        .username
        .clone()
        .ok_or_else(|| AuthError::ClusterReviewRejected("TokenReview user has no username".into()))?;

    let groups = user.groups.clone().unwrap_or_default();

    debug!(username = %username, groups = ?groups, "TokenReview authenticated caller");

    Ok(CallerIdentity { username, groups })
}

/// [`TokenReviewer`] using the base client of the current snapshot
///
/// The snapshot is read per review, so reviews follow credential reloads.
pub struct KubeTokenReviewer {
    snapshots: SnapshotCell,
}

impl KubeTokenReviewer {
    /// Create a reviewer reading clients from `snapshots`
    pub fn new(snapshots: SnapshotCell) -> Self {
        Self { snapshots }
    }
}

#[async_trait]
impl TokenReviewer for KubeTokenReviewer {
    async fn review(&self, token: &str, audience: &str) -> Result<CallerIdentity, AuthError> {
        let snapshot = self.snapshots.load().await;
        review_with_client(snapshot.base.client().clone(), token, audience).await
    }
}
