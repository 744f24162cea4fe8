//! JWS compact encoding of Guardian tokens (`alg = EdDSA`).
//!
//! `base64url(header) . base64url(claims) . base64url(signature)`, where the
//! signature covers the first two segments as ASCII.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::AuthorizationError;
use crate::domain::Strategy;

use super::keys::KeyManager;

pub const TOKEN_ALG: &str = "EdDSA";
pub const TOKEN_TYP: &str = "JWT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

/// Action the token was minted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    pub issue_id: String,
    pub strategy: Strategy,
    pub step_count: usize,
}

/// Signed token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    /// Remediation action id.
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub ctx: ActionContext,
}

impl TokenClaims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.iat, 0).single().unwrap_or_default()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_default()
    }

    pub fn ttl_secs(&self) -> i64 {
        self.exp - self.iat
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Sign `claims` with the active key.
pub fn encode(claims: &TokenClaims, keys: &KeyManager) -> Result<String, AuthorizationError> {
    let header = TokenHeader {
        alg: TOKEN_ALG.into(),
        typ: TOKEN_TYP.into(),
        kid: keys.active_kid().to_string(),
    };
    let header = serde_json::to_vec(&header)
        .map_err(|e| AuthorizationError::Malformed(format!("header: {e}")))?;
    let claims = serde_json::to_vec(claims)
        .map_err(|e| AuthorizationError::Malformed(format!("claims: {e}")))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(claims)
    );
    let signature = keys.sign(signing_input.as_bytes());
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Check structure, algorithm, key id and signature, then decode the claims.
///
/// Claims are only parsed after the signature verifies. Issuer, expiry and
/// scope checks are the caller's job.
pub fn decode_verified(token: &str, keys: &KeyManager) -> Result<TokenClaims, AuthorizationError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthorizationError::Malformed(
            "expected three dot-separated segments".into(),
        ));
    };

    let header: TokenHeader = decode_segment(header_b64, "header")?;
    if header.alg != TOKEN_ALG {
        return Err(AuthorizationError::InvalidSignature(format!(
            "unsupported alg '{}'",
            header.alg
        )));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| AuthorizationError::Malformed("signature is not base64url".into()))?;
    let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
    keys.verify(&header.kid, signing_input.as_bytes(), &signature)?;

    decode_segment(claims_b64, "claims")
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, AuthorizationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthorizationError::Malformed(format!("{what} is not base64url")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthorizationError::Malformed(format!("{what}: {e}")))
}
