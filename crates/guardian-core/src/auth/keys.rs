//! Ed25519 signing keys with `kid`-addressed verification keys.
//!
//! The active key signs; every key ever installed (until retired) verifies.
//! Rotation keeps old public keys so tokens signed before the rotation stay
//! verifiable until they expire.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::error::AuthorizationError;

/// Failure to load key material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("secret key must be 32 bytes of hex, got {len} hex chars")]
    BadSecretLength { len: usize },

    #[error("secret key is not valid hex")]
    BadSecretHex,

    #[error("public key for kid '{kid}' is invalid")]
    BadPublicKey { kid: String },
}

/// One public key in a JWK set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    /// base64url (unpadded) public key bytes.
    pub x: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Key id for a public key: first 16 hex chars of its SHA-256.
pub fn compute_kid(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.to_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Holds the active signing key and all verification keys by `kid`.
pub struct KeyManager {
    active_kid: String,
    signing: SigningKey,
    verifying: BTreeMap<String, VerifyingKey>,
}

impl KeyManager {
    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Deterministic key from a 32-byte secret handed over by the key custodian.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(secret.trim()).map_err(|_| KeyError::BadSecretHex)?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::BadSecretLength {
                len: secret.trim().len(),
            })?;
        Ok(Self::from_secret_bytes(&secret))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let public = signing.verifying_key();
        let kid = compute_kid(&public);
        let mut verifying = BTreeMap::new();
        verifying.insert(kid.clone(), public);
        Self {
            active_kid: kid,
            signing,
            verifying,
        }
    }

    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    /// Hex of the active secret, for export by the key custodian tooling.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// Verify `signature` over `message` with the key named `kid`.
    pub fn verify(
        &self,
        kid: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), AuthorizationError> {
        let key = self
            .verifying
            .get(kid)
            .ok_or_else(|| AuthorizationError::InvalidSignature(format!("unknown kid '{kid}'")))?;
        let signature = Signature::from_slice(signature)
            .map_err(|_| AuthorizationError::InvalidSignature("bad signature length".into()))?;
        key.verify_strict(message, &signature)
            .map_err(|_| AuthorizationError::InvalidSignature("signature does not verify".into()))
    }

    /// Install a new random active key. Returns the new kid.
    pub fn rotate(&mut self) -> String {
        self.install(SigningKey::generate(&mut OsRng))
    }

    /// Install a custodian-provided key as the active one. Returns its kid.
    pub fn rotate_to(&mut self, secret: &[u8; 32]) -> String {
        self.install(SigningKey::from_bytes(secret))
    }

    fn install(&mut self, signing: SigningKey) -> String {
        let public = signing.verifying_key();
        let kid = compute_kid(&public);
        self.verifying.insert(kid.clone(), public);
        self.signing = signing;
        self.active_kid = kid.clone();
        tracing::info!(kid = %kid, "signing key rotated");
        kid
    }

    /// Trust an additional public key for verification only.
    pub fn add_verifying_key(&mut self, public: &[u8; 32]) -> Result<String, KeyError> {
        let key = VerifyingKey::from_bytes(public).map_err(|_| KeyError::BadPublicKey {
            kid: hex::encode(&public[..8]),
        })?;
        let kid = compute_kid(&key);
        self.verifying.insert(kid.clone(), key);
        Ok(kid)
    }

    /// Stop trusting a retired key. The active key cannot be retired.
    pub fn retire(&mut self, kid: &str) -> bool {
        if kid == self.active_kid {
            return false;
        }
        self.verifying.remove(kid).is_some()
    }

    pub fn kids(&self) -> Vec<String> {
        self.verifying.keys().cloned().collect()
    }

    /// Public keys as a JWK set.
    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: self
                .verifying
                .iter()
                .map(|(kid, key)| Jwk {
                    kty: "OKP".into(),
                    crv: "Ed25519".into(),
                    kid: kid.clone(),
                    key_use: "sig".into(),
                    alg: "EdDSA".into(),
                    x: URL_SAFE_NO_PAD.encode(key.to_bytes()),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("active_kid", &self.active_kid)
            .field("signing", &"[REDACTED]")
            .field("kids", &self.verifying.keys().collect::<Vec<_>>())
            .finish()
    }
}
