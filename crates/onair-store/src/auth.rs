//! Bearer-token authorization for mutating operations.
//!
//! Token issuance lives outside this crate; here a token is either the
//! configured admin token or a channel credential whose BLAKE3 digest is
//! stored under `auth:{channel}:password`.

use std::sync::Arc;

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use tracing::debug;

use onair_shared::{keys, ChannelName, CoreError, CoreResult};

use crate::kv::KeyValueStore;

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Superuser check that bypasses channel scoping.
    async fn is_admin(&self, token: &str) -> CoreResult<bool>;

    async fn can_manage(&self, token: &str, channel: &ChannelName) -> CoreResult<bool>;
}

/// Require `is_admin(token) || can_manage(token, channel)`.
pub async fn authorize(
    authorizer: &dyn Authorizer,
    token: &str,
    channel: &ChannelName,
) -> CoreResult<()> {
    if authorizer.is_admin(token).await? || authorizer.can_manage(token, channel).await? {
        return Ok(());
    }
    debug!(channel = %channel, "Rejected token for channel");
    Err(CoreError::Unauthorized)
}

pub async fn authorize_admin(authorizer: &dyn Authorizer, token: &str) -> CoreResult<()> {
    if authorizer.is_admin(token).await? {
        return Ok(());
    }
    debug!("Rejected non-admin token");
    Err(CoreError::Unauthorized)
}

/// Hex BLAKE3 digest stored in place of a channel credential.
pub fn credential_digest(token: &str) -> String {
    hex::encode(blake3::hash(token.as_bytes()).as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}

/// Admin token from configuration plus per-channel credentials in the store.
pub struct CredentialAuthorizer {
    kv: Arc<dyn KeyValueStore>,
    admin_token: Option<String>,
}

impl CredentialAuthorizer {
    pub fn new(kv: Arc<dyn KeyValueStore>, admin_token: Option<String>) -> Self {
        Self {
            kv,
            admin_token: admin_token.filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl Authorizer for CredentialAuthorizer {
    async fn is_admin(&self, token: &str) -> CoreResult<bool> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Ok(false);
        };
        Ok(!token.is_empty() && constant_time_eq(token.as_bytes(), expected.as_bytes()))
    }

    async fn can_manage(&self, token: &str, channel: &ChannelName) -> CoreResult<bool> {
        if token.is_empty() {
            return Ok(false);
        }
        let Some(stored) = self.kv.get(&keys::password(channel)).await? else {
            return Ok(false);
        };
        let presented = credential_digest(token);
        Ok(constant_time_eq(presented.as_bytes(), stored.as_bytes()))
    }
}
