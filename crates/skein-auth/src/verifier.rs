use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

/// Claims carried by a credential issued by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Identity of the credential holder.
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Expiry as a unix timestamp. Checked by the verifier.
    pub exp: i64,
}

/// The verified identity attached to a request.
///
/// Derived per-request from a credential, never persisted; its lifetime is
/// one request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub claims: Claims,
}

/// Verifies signed credentials against a fixed shared secret.
///
/// Holds only immutable key material, so a single instance can be shared
/// across all concurrent requests.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a raw credential string.
    pub fn verify(&self, credential: &str) -> Result<Principal, VerifyError> {
        if credential.is_empty() {
            return Err(VerifyError::MissingCredential);
        }
        let data = decode::<Claims>(credential, &self.key, &self.validation)?;
        Ok(Principal {
            id: data.claims.user_id.clone(),
            claims: data.claims,
        })
    }

    /// Verify the credential carried in an `Authorization: Bearer ...` header.
    ///
    /// A missing header and a malformed one are both `MissingCredential`: from
    /// the gateway's point of view no usable credential was supplied.
    pub fn verify_bearer(&self, header: Option<&str>) -> Result<Principal, VerifyError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .filter(|t| !t.is_empty())
            .ok_or(VerifyError::MissingCredential)?;
        self.verify(token)
    }
}
